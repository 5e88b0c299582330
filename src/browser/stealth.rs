//! Per-page fingerprint randomization and stealth evasion scripts.
//! Based on puppeteer-extra-plugin-stealth techniques.

use rand::Rng;

/// Real browser user agents, Chromium-family only since the engine is Chrome.
pub const USER_AGENTS: &[&str] = &[
    // Chrome on Windows
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36",
    // Chrome on Mac
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36",
    // Chrome on Linux
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    // Edge on Windows
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36 Edg/131.0.0.0",
];

/// Common desktop viewport sizes.
pub const VIEWPORTS: &[(u32, u32)] = &[
    (1920, 1080),
    (1536, 864),
    (1440, 900),
    (1366, 768),
    (1280, 800),
    (1600, 900),
];

/// Accept-Language values paired with the matching `navigator.languages`.
const LANGUAGE_SETS: &[(&str, &[&str])] = &[
    ("en-US,en;q=0.9", &["en-US", "en"]),
    ("en-GB,en;q=0.9", &["en-GB", "en"]),
    ("en-US,en;q=0.9,es;q=0.8", &["en-US", "en", "es"]),
    ("en-US,en;q=0.8,fr;q=0.6", &["en-US", "en", "fr"]),
];

/// Pick a random real-browser user agent.
pub fn random_user_agent() -> &'static str {
    USER_AGENTS[rand::rng().random_range(0..USER_AGENTS.len())]
}

/// Randomized identity applied to a page before navigation.
#[derive(Debug, Clone, PartialEq)]
pub struct Fingerprint {
    pub user_agent: String,
    pub viewport: (u32, u32),
    pub accept_language: String,
    pub languages: Vec<String>,
}

impl Fingerprint {
    pub fn random() -> Self {
        let mut rng = rand::rng();
        let user_agent = USER_AGENTS[rng.random_range(0..USER_AGENTS.len())];
        let viewport = VIEWPORTS[rng.random_range(0..VIEWPORTS.len())];
        let (accept_language, languages) = LANGUAGE_SETS[rng.random_range(0..LANGUAGE_SETS.len())];
        Self {
            user_agent: user_agent.to_string(),
            viewport,
            accept_language: accept_language.to_string(),
            languages: languages.iter().map(|l| l.to_string()).collect(),
        }
    }

    /// `navigator.platform` consistent with the user agent.
    pub fn platform(&self) -> &'static str {
        if self.user_agent.contains("Windows") {
            "Win32"
        } else if self.user_agent.contains("Macintosh") {
            "MacIntel"
        } else {
            "Linux x86_64"
        }
    }

    /// Extra request headers sent with every navigation.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Accept-Language", self.accept_language.clone()),
            (
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8"
                    .to_string(),
            ),
            ("Upgrade-Insecure-Requests", "1".to_string()),
        ]
    }

    /// Scripts to evaluate on every new document, before site scripts run.
    pub fn scripts(&self) -> Vec<String> {
        let languages = serde_json::to_string(&self.languages).unwrap_or_else(|_| "[]".into());
        let mut scripts: Vec<String> = STATIC_SCRIPTS.iter().map(|s| s.to_string()).collect();
        scripts.push(format!(
            r#"
            Object.defineProperty(navigator, 'languages', {{
                get: () => {languages},
                configurable: true
            }});
            Object.defineProperty(navigator, 'platform', {{
                get: () => '{platform}',
                configurable: true
            }});
            "#,
            languages = languages,
            platform = self.platform(),
        ));
        scripts
    }
}

const STATIC_SCRIPTS: &[&str] = &[
    // webdriver flag
    r#"
    Object.defineProperty(navigator, 'webdriver', {
        get: () => undefined,
        configurable: true
    });
    "#,
    // chrome object
    r#"
    window.chrome = window.chrome || {
        runtime: {},
        loadTimes: function() {},
        csi: function() {},
        app: {}
    };
    "#,
    // permissions
    r#"
    const originalQuery = window.navigator.permissions.query;
    window.navigator.permissions.query = (parameters) => (
        parameters.name === 'notifications' ?
        Promise.resolve({ state: Notification.permission }) :
        originalQuery(parameters)
    );
    "#,
    // plugins
    r#"
    Object.defineProperty(navigator, 'plugins', {
        get: () => [
            { name: 'Chrome PDF Plugin', filename: 'internal-pdf-viewer', description: 'Portable Document Format' },
            { name: 'Chrome PDF Viewer', filename: 'mhjfbmdgcfjbbpaeojofohoefgiehjai', description: '' },
            { name: 'Native Client', filename: 'internal-nacl-plugin', description: '' }
        ],
        configurable: true
    });
    "#,
    // chromedriver leftovers
    r#"
    delete window.cdc_adoQpoasnfa76pfcZLmcfl_Array;
    delete window.cdc_adoQpoasnfa76pfcZLmcfl_Promise;
    delete window.cdc_adoQpoasnfa76pfcZLmcfl_Symbol;
    "#,
    // WebGL vendor/renderer
    r#"
    const getParameter = WebGLRenderingContext.prototype.getParameter;
    WebGLRenderingContext.prototype.getParameter = function(parameter) {
        if (parameter === 37445) {
            return 'Intel Inc.';
        }
        if (parameter === 37446) {
            return 'Intel Iris OpenGL Engine';
        }
        return getParameter.call(this, parameter);
    };
    "#,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_fingerprint_uses_known_values() {
        for _ in 0..20 {
            let fp = Fingerprint::random();
            assert!(USER_AGENTS.contains(&fp.user_agent.as_str()));
            assert!(VIEWPORTS.contains(&fp.viewport));
            assert_eq!(fp.languages[0], fp.accept_language.split(',').next().unwrap());
        }
    }

    #[test]
    fn platform_follows_user_agent() {
        let mut fp = Fingerprint::random();
        fp.user_agent = USER_AGENTS[2].to_string();
        assert_eq!(fp.platform(), "MacIntel");
        fp.user_agent = USER_AGENTS[4].to_string();
        assert_eq!(fp.platform(), "Linux x86_64");
    }

    #[test]
    fn scripts_embed_languages() {
        let fp = Fingerprint {
            user_agent: USER_AGENTS[0].to_string(),
            viewport: (1920, 1080),
            accept_language: "en-GB,en;q=0.9".to_string(),
            languages: vec!["en-GB".to_string(), "en".to_string()],
        };
        let scripts = fp.scripts();
        assert_eq!(scripts.len(), STATIC_SCRIPTS.len() + 1);
        let last = scripts.last().unwrap();
        assert!(last.contains(r#"["en-GB","en"]"#));
        assert!(last.contains("'Win32'"));
    }
}
