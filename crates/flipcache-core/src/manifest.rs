//! Pre-cache manifest.
//!
//! A manifest is the ordered list of every URL the install step caches.
//! Static entries are listed explicitly; numbered asset families (pages,
//! thumbnails, full-size images, per-page scripts) come from a `ContentSet`
//! whose templates are expanded for every index in an inclusive range.
//!
//! Entries stay relative until `Manifest::resolve` joins them onto the
//! worker scope.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Placeholder replaced by the page index in content-set templates.
pub const INDEX_PLACEHOLDER: &str = "{n}";

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Invalid manifest entry {entry:?}: {source}")]
    InvalidEntry {
        entry: String,
        #[source]
        source: url::ParseError,
    },
}

/// A numbered family of assets, e.g. one presentation's pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentSet {
    pub name: String,
    #[serde(default = "default_first")]
    pub first: u32,
    pub last: u32,
    pub templates: Vec<String>,
}

fn default_first() -> u32 {
    1
}

impl ContentSet {
    pub fn new(name: impl Into<String>, last: u32) -> Self {
        Self {
            name: name.into(),
            first: default_first(),
            last,
            templates: Vec::new(),
        }
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.templates.push(template.into());
        self
    }

    /// Expand index-major: every template for 1, then every template for 2...
    /// An empty range (first > last) expands to nothing.
    pub fn expand(&self) -> impl Iterator<Item = String> + '_ {
        (self.first..=self.last).flat_map(move |n| {
            let index = n.to_string();
            self.templates
                .iter()
                .map(move |template| template.replace(INDEX_PLACEHOLDER, &index))
        })
    }

    /// Saturates at `usize::MAX` instead of overflowing on huge ranges.
    pub fn len(&self) -> usize {
        if self.first > self.last {
            return 0;
        }
        let indices = u64::from(self.last) - u64::from(self.first) + 1;
        usize::try_from(indices)
            .unwrap_or(usize::MAX)
            .saturating_mul(self.templates.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Collects entries, dropping exact duplicates while keeping first-seen order.
#[derive(Debug, Default)]
pub struct ManifestBuilder {
    entries: Vec<String>,
    seen: HashSet<String>,
}

impl ManifestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn static_entry(mut self, entry: impl Into<String>) -> Self {
        self.push(entry.into());
        self
    }

    pub fn static_entries<I, S>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for entry in entries {
            self.push(entry.into());
        }
        self
    }

    pub fn content_set(mut self, set: &ContentSet) -> Self {
        for entry in set.expand() {
            self.push(entry);
        }
        self
    }

    pub fn build(self) -> Manifest {
        Manifest {
            entries: self.entries,
        }
    }

    fn push(&mut self, entry: String) {
        if self.seen.insert(entry.clone()) {
            self.entries.push(entry);
        }
    }
}

/// The ordered list of entries to pre-cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: Vec<String>,
}

impl Manifest {
    pub fn builder() -> ManifestBuilder {
        ManifestBuilder::new()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    /// Join every entry onto `scope`.
    pub fn resolve(&self, scope: &Url) -> Result<Vec<Url>, ManifestError> {
        self.entries
            .iter()
            .map(|entry| {
                scope.join(entry).map_err(|source| ManifestError::InvalidEntry {
                    entry: entry.clone(),
                    source,
                })
            })
            .collect()
    }
}

/// Serializable manifest description, as stored in the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestSpec {
    #[serde(default)]
    pub static_entries: Vec<String>,
    #[serde(default)]
    pub content_sets: Vec<ContentSet>,
}

impl ManifestSpec {
    pub fn build(&self) -> Manifest {
        let builder = Manifest::builder().static_entries(self.static_entries.iter().cloned());
        self.content_sets
            .iter()
            .fold(builder, |builder, set| builder.content_set(set))
            .build()
    }

    /// The two-presentation site: a shared shell, then each presentation's
    /// fixed assets, then every numbered page of each presentation.
    pub fn presentation_site() -> Self {
        let decks = [("Complan", "Complan_ico.png", 37), ("Products", "Product_ico.png", 26)];

        let shell = ["./", "./index.html", "./manifest.json", "./pwa-install.js"];
        let mut static_entries: Vec<String> = shell.iter().map(|s| s.to_string()).collect();

        for (deck, icon, _) in decks {
            static_entries.extend(Self::deck_assets(deck, icon));
        }

        let content_sets = decks
            .iter()
            .map(|(deck, _, pages)| {
                ContentSet::new(*deck, *pages)
                    .with_template(format!("./{}/mobile/javascript/text_position[{{n}}].js", deck))
                    .with_template(format!("./{}/files/mobile/{{n}}.jpg", deck))
                    .with_template(format!("./{}/files/thumb/{{n}}.jpg", deck))
                    .with_template(format!("./{}/files/basic-html/page{{n}}.html", deck))
            })
            .collect();

        Self {
            static_entries,
            content_sets,
        }
    }

    fn deck_assets(deck: &str, icon: &str) -> Vec<String> {
        const SHELL: [&str; 5] = [
            "index.html",
            "manifest.json",
            "shot.png",
            "files/shot.png",
            "files/config.xml",
        ];
        const STYLES: [&str; 4] = ["style.css", "player.css", "phoneTemplate.css", "template.css"];
        const SCRIPTS: [&str; 8] = [
            "jquery-3.5.1.min.js",
            "config.js",
            "main.js",
            "LoadingJS.js",
            "search_config.js",
            "bookmark_config.js",
            "flv.min.js",
            "html2canvas.min.js",
        ];
        const FAVICONS: [&str; 6] = [
            "android-chrome-192x192.png",
            "android-chrome-512x512.png",
            "apple-touch-icon.png",
            "favicon.ico",
            "favicon-16x16.png",
            "favicon-32x32.png",
        ];
        const BACKGROUNDS: [&str; 2] = [
            "files/extfiles/mainbgImgUrl.jpg",
            "files/mobile-ext/backGroundImgURL.jpg",
        ];
        const NAV_IMAGES: [&str; 11] = [
            "bottom_bg.jpg",
            "content.png",
            "middle_bg.jpg",
            "next.png",
            "next2.png",
            "next_big.png",
            "previous.png",
            "previous2.png",
            "previous_big.png",
            "top_bg.jpg",
            "view.png",
        ];

        let mut assets = Vec::new();
        assets.extend(SHELL.iter().map(|f| format!("./{}/{}", deck, f)));
        assets.push(format!("./{}/{}", deck, icon));
        assets.extend(STYLES.iter().map(|f| format!("./{}/mobile/style/{}", deck, f)));
        assets.extend(SCRIPTS.iter().map(|f| format!("./{}/mobile/javascript/{}", deck, f)));
        assets.extend(FAVICONS.iter().map(|f| format!("./{}/favicons_folder/{}", deck, f)));
        assets.extend(BACKGROUNDS.iter().map(|f| format!("./{}/{}", deck, f)));
        assets.extend(
            NAV_IMAGES
                .iter()
                .map(|f| format!("./{}/files/basic-html/images/{}", deck, f)),
        );
        assets.push(format!("./{}/files/basic-html/index.html", deck));
        assets
    }
}
