//! Slug normalization for titles and chapters.

use deunicode::deunicode;
use url::Url;

/// Transliterate to ASCII, lowercase, and collapse every run of other
/// characters into a single `-`.
pub fn slugify(input: &str) -> String {
    let ascii = deunicode(input);
    let mut slug = String::with_capacity(ascii.len());
    let mut pending_dash = false;

    for c in ascii.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

/// Title slug from its name, falling back to the target URL's last path
/// segment.
pub fn title_slug(name: &str, source_url: &str) -> String {
    slug_or_last_segment(name, source_url)
}

/// Chapter slug from its title, falling back to the last path segment of
/// the chapter URL when the title has no usable characters.
pub fn chapter_slug(title: &str, source_url: &str) -> String {
    slug_or_last_segment(title, source_url)
}

fn slug_or_last_segment(text: &str, source_url: &str) -> String {
    let slug = slugify(text);
    if !slug.is_empty() {
        return slug;
    }
    Url::parse(source_url)
        .ok()
        .and_then(|url| {
            url.path_segments()
                .and_then(|segments| segments.filter(|s| !s.is_empty()).last().map(slugify))
        })
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| slugify(source_url))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_clean(slug: &str) -> bool {
        !slug.is_empty()
            && !slug.starts_with('-')
            && !slug.ends_with('-')
            && !slug.contains("--")
            && slug.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    }

    #[test]
    fn slugify_collapses_and_trims() {
        assert_eq!(slugify("  The Tower of God!! "), "the-tower-of-god");
        assert_eq!(slugify("Chapter 12.5 - Part 2"), "chapter-12-5-part-2");
        assert_eq!(slugify("---"), "");
    }

    #[test]
    fn slugify_folds_accents() {
        assert_eq!(slugify("Pokémon Ñandú Straße"), "pokemon-nandu-strasse");
        assert_eq!(slugify("ÉCOLE"), "ecole");
    }

    #[test]
    fn vietnamese_titles_are_transliterated() {
        assert_eq!(slugify("Thần Đồng Đất Việt"), "than-dong-dat-viet");
        assert_eq!(slugify("Chương 1"), "chuong-1");
        assert_eq!(slugify("Ngự Linh Thế Giới"), "ngu-linh-the-gioi");
    }

    #[test]
    fn cjk_titles_get_usable_slugs() {
        for title in ["나 혼자만 레벨업", "進撃の巨人", "斗破苍穹", "ワンパンマン"] {
            let slug = slugify(title);
            assert!(is_clean(&slug), "{:?} -> {:?}", title, slug);
        }
        assert_ne!(slugify("進撃の巨人"), slugify("斗破苍穹"));
    }

    #[test]
    fn punctuation_drift_maps_to_same_slug() {
        assert_eq!(slugify("Solo Leveling: Ragnarok"), slugify("solo leveling - ragnarok"));
    }

    #[test]
    fn chapter_slug_falls_back_to_url_segment() {
        assert_eq!(chapter_slug("Chapter 3", "https://example.com/t/c3"), "chapter-3");
        assert_eq!(
            chapter_slug("  ", "https://example.com/title-x/chapter-7/"),
            "chapter-7"
        );
        assert_eq!(chapter_slug("…", "https://example.com/read?id=9"), "read");
    }

    #[test]
    fn title_slug_falls_back_to_url_segment() {
        assert_eq!(title_slug("Title X", "https://example.com/t/x"), "title-x");
        assert_eq!(title_slug("  ", "https://example.com/truyen/title-x"), "title-x");
    }
}
