//! App name resolution: spoken/typed display name -> launchable identifier.
//!
//! Matching order is exact key, then token-set Jaccard, then Levenshtein.
//! The index is filled from an `AppInventory` on the first miss and refreshed
//! at most once per lookup.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub const JACCARD_THRESHOLD: f64 = 0.5;
pub const MAX_EDIT_DISTANCE: usize = 3;

#[async_trait]
pub trait AppInventory: Send + Sync {
    /// `(display name, platform identifier)` pairs.
    async fn list_installed_apps(&self) -> Result<Vec<(String, String)>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppIndexEntry {
    pub normalized_name: String,
    pub identifier: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    TokenSet,
    EditDistance,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub identifier: String,
    pub matched_name: String,
    pub kind: MatchKind,
}

/// Punctuation becomes whitespace, whitespace runs collapse. Case is kept;
/// index keys apply `to_lowercase` on top of this.
pub fn normalize(name: &str) -> String {
    let spaced: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    spaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn index_key(name: &str) -> String {
    normalize(name).to_lowercase()
}

pub fn jaccard(a: &HashSet<&str>, b: &HashSet<&str>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

fn token_set(key: &str) -> HashSet<&str> {
    key.split(' ').filter(|t| !t.is_empty()).collect()
}

/// Classic two-row dynamic programming edit distance over chars.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

fn match_in(index: &BTreeMap<String, String>, key: &str) -> Option<Resolution> {
    if key.is_empty() {
        return None;
    }

    if let Some(id) = index.get(key) {
        return Some(Resolution {
            identifier: id.clone(),
            matched_name: key.to_string(),
            kind: MatchKind::Exact,
        });
    }

    let query_tokens = token_set(key);
    let mut best_jaccard: Option<(f64, &String, &String)> = None;
    for (name, id) in index {
        let score = jaccard(&query_tokens, &token_set(name));
        if score < JACCARD_THRESHOLD {
            continue;
        }
        // BTreeMap order makes ties resolve to the alphabetically first name.
        if best_jaccard.map(|(best, _, _)| score > best).unwrap_or(true) {
            best_jaccard = Some((score, name, id));
        }
    }
    if let Some((score, name, id)) = best_jaccard {
        debug!("[Resolver] '{}' ~ '{}' (jaccard {:.2})", key, name, score);
        return Some(Resolution {
            identifier: id.clone(),
            matched_name: name.clone(),
            kind: MatchKind::TokenSet,
        });
    }

    let mut best_distance: Option<(usize, &String, &String)> = None;
    for (name, id) in index {
        let distance = levenshtein(key, name);
        // Rewriting every character of a short name is not a typo.
        let shorter = key.chars().count().min(name.chars().count());
        if distance > MAX_EDIT_DISTANCE || distance >= shorter {
            continue;
        }
        if best_distance.map(|(best, _, _)| distance < best).unwrap_or(true) {
            best_distance = Some((distance, name, id));
        }
    }
    best_distance.map(|(distance, name, id)| {
        debug!("[Resolver] '{}' ~ '{}' (edit distance {})", key, name, distance);
        Resolution {
            identifier: id.clone(),
            matched_name: name.clone(),
            kind: MatchKind::EditDistance,
        }
    })
}

pub struct AppNameResolver {
    inventory: Arc<dyn AppInventory>,
    index: RwLock<BTreeMap<String, String>>,
}

impl AppNameResolver {
    pub fn new(inventory: Arc<dyn AppInventory>) -> Self {
        Self {
            inventory,
            index: RwLock::new(BTreeMap::new()),
        }
    }

    pub async fn resolve(&self, name: &str) -> Option<String> {
        self.resolve_detailed(name).await.map(|r| r.identifier)
    }

    pub async fn resolve_detailed(&self, name: &str) -> Option<Resolution> {
        let key = index_key(name);
        if key.is_empty() {
            return None;
        }

        if let Some(found) = match_in(&*self.index.read().await, &key) {
            return Some(found);
        }

        if let Err(e) = self.refresh().await {
            warn!("[Resolver] Inventory refresh failed: {}", e);
            return None;
        }

        let found = match_in(&*self.index.read().await, &key);
        if found.is_none() {
            info!("[Resolver] No installed app matches '{}'", name);
        }
        found
    }

    /// Rebuilds the whole index from the inventory.
    pub async fn refresh(&self) -> Result<usize> {
        let apps = self.inventory.list_installed_apps().await?;
        let mut rebuilt = BTreeMap::new();
        for (display, identifier) in apps {
            let key = index_key(&display);
            if key.is_empty() || identifier.trim().is_empty() {
                continue;
            }
            // First entry wins so curated tables can shadow derived names.
            rebuilt.entry(key).or_insert(identifier);
        }
        let count = rebuilt.len();
        *self.index.write().await = rebuilt;
        debug!("[Resolver] Index rebuilt with {} apps", count);
        Ok(count)
    }

    pub async fn entries(&self) -> Vec<AppIndexEntry> {
        self.index
            .read()
            .await
            .iter()
            .map(|(name, id)| AppIndexEntry {
                normalized_name: name.clone(),
                identifier: id.clone(),
            })
            .collect()
    }
}

/// Fixed name table. Ships with common Android apps via `builtin()`.
pub struct StaticInventory {
    apps: Vec<(String, String)>,
}

impl StaticInventory {
    pub fn new(apps: Vec<(String, String)>) -> Self {
        Self { apps }
    }

    pub fn builtin() -> Self {
        Self::new(
            BUILTIN_APPS
                .iter()
                .map(|(name, id)| (name.to_string(), id.to_string()))
                .collect(),
        )
    }
}

#[async_trait]
impl AppInventory for StaticInventory {
    async fn list_installed_apps(&self) -> Result<Vec<(String, String)>> {
        Ok(self.apps.clone())
    }
}

/// Concatenates several inventories in priority order. A failing source is
/// skipped as long as at least one succeeds.
pub struct CompositeInventory {
    sources: Vec<Arc<dyn AppInventory>>,
}

impl CompositeInventory {
    pub fn new(sources: Vec<Arc<dyn AppInventory>>) -> Self {
        Self { sources }
    }
}

#[async_trait]
impl AppInventory for CompositeInventory {
    async fn list_installed_apps(&self) -> Result<Vec<(String, String)>> {
        let mut all = Vec::new();
        let mut last_err = None;
        let mut any_ok = false;
        for source in &self.sources {
            match source.list_installed_apps().await {
                Ok(apps) => {
                    any_ok = true;
                    all.extend(apps);
                }
                Err(e) => {
                    warn!("[Resolver] Inventory source failed: {}", e);
                    last_err = Some(e);
                }
            }
        }
        match (any_ok, last_err) {
            (false, Some(e)) => Err(e),
            _ => Ok(all),
        }
    }
}

const BUILTIN_APPS: &[(&str, &str)] = &[
    ("Chrome", "com.android.chrome"),
    ("Google Chrome", "com.android.chrome"),
    ("Settings", "com.android.settings"),
    ("Camera", "com.android.camera2"),
    ("Phone", "com.google.android.dialer"),
    ("Contacts", "com.google.android.contacts"),
    ("Messages", "com.google.android.apps.messaging"),
    ("Gmail", "com.google.android.gm"),
    ("Google Maps", "com.google.android.apps.maps"),
    ("Maps", "com.google.android.apps.maps"),
    ("YouTube", "com.google.android.youtube"),
    ("YouTube Music", "com.google.android.apps.youtube.music"),
    ("Google Photos", "com.google.android.apps.photos"),
    ("Photos", "com.google.android.apps.photos"),
    ("Google Play Store", "com.android.vending"),
    ("Play Store", "com.android.vending"),
    ("Google Calendar", "com.google.android.calendar"),
    ("Calendar", "com.google.android.calendar"),
    ("Clock", "com.google.android.deskclock"),
    ("Calculator", "com.google.android.calculator"),
    ("Files", "com.google.android.apps.nbu.files"),
    ("Google Drive", "com.google.android.apps.docs"),
    ("Google Keep", "com.google.android.keep"),
    ("Google", "com.google.android.googlequicksearchbox"),
    ("Google Translate", "com.google.android.apps.translate"),
    ("WhatsApp", "com.whatsapp"),
    ("Telegram", "org.telegram.messenger"),
    ("Instagram", "com.instagram.android"),
    ("Facebook", "com.facebook.katana"),
    ("Messenger", "com.facebook.orca"),
    ("X", "com.twitter.android"),
    ("Twitter", "com.twitter.android"),
    ("TikTok", "com.zhiliaoapp.musically"),
    ("Spotify", "com.spotify.music"),
    ("Netflix", "com.netflix.mediaclient"),
    ("Amazon Shopping", "com.amazon.mshop.android.shopping"),
    ("Uber", "com.ubercab"),
    ("Reddit", "com.reddit.frontpage"),
    ("Slack", "com.Slack"),
    ("Discord", "com.discord"),
    ("Microsoft Outlook", "com.microsoft.office.outlook"),
    ("Zoom", "us.zoom.videomeetings"),
    ("Firefox", "org.mozilla.firefox"),
];
