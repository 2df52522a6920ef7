//! JSON string tables per locale
//!
//! Each locale is a flat `{"key": "text"}` file named `<code>.json` under the
//! localization root. A locale with no file starts out empty and the file is
//! created so translators have somewhere to write.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::core::error::Result;

pub const DEFAULT_LOCALE: &str = "en-US";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocaleInfo {
    pub code: String,
    pub display_name: String,
    pub native_name: String,
    pub right_to_left: bool,
}

impl LocaleInfo {
    fn new(code: &str, display_name: &str, native_name: &str) -> Self {
        Self {
            code: code.to_string(),
            display_name: display_name.to_string(),
            native_name: native_name.to_string(),
            right_to_left: false,
        }
    }

    fn rtl(mut self) -> Self {
        self.right_to_left = true;
        self
    }
}

pub fn builtin_locales() -> Vec<LocaleInfo> {
    vec![
        LocaleInfo::new("en-US", "English (United States)", "English (United States)"),
        LocaleInfo::new("ja-JP", "Japanese (Japan)", "日本語"),
        LocaleInfo::new("es-ES", "Spanish (Spain)", "Español"),
        LocaleInfo::new("fr-FR", "French (France)", "Français"),
        LocaleInfo::new("de-DE", "German (Germany)", "Deutsch"),
        LocaleInfo::new("zh-CN", "Chinese (Simplified)", "简体中文"),
        LocaleInfo::new("ar-SA", "Arabic (Saudi Arabia)", "العربية").rtl(),
    ]
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LocalizationStats {
    pub current_locale: String,
    pub available_locales: usize,
    pub total_keys: usize,
    pub translated_keys: usize,
    pub missing_translations: u64,
    pub locale_changes: u64,
    pub reloads: u64,
    pub last_locale_change: Duration,
    pub last_reload: Duration,
    pub key_access_counts: BTreeMap<String, u64>,
}

/// Replace `{0}`, `{1}`, ... with the matching argument. Placeholders
/// without an argument are left as written.
pub fn format_positional(template: &str, args: &[&dyn Display]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let index = after
            .find('}')
            .and_then(|close| after[..close].parse::<usize>().ok().map(|i| (i, close)));
        match index {
            Some((i, close)) if i < args.len() => {
                out.push_str(&args[i].to_string());
                rest = &after[close + 1..];
            }
            _ => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

#[derive(Default)]
struct Counters {
    missing: u64,
    locale_changes: u64,
    reloads: u64,
    last_locale_change: Duration,
    last_reload: Duration,
    key_access: BTreeMap<String, u64>,
}

pub struct LocalizationService {
    root: PathBuf,
    locales: Vec<LocaleInfo>,
    current: RwLock<LocaleInfo>,
    translations: RwLock<HashMap<String, String>>,
    cache: RwLock<HashMap<String, HashMap<String, String>>>,
    counters: RwLock<Counters>,
}

impl LocalizationService {
    /// Opens the table directory and loads the default locale. A broken
    /// default file is logged and leaves the table empty.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        let locales = builtin_locales();
        let default = locales
            .iter()
            .find(|l| l.code == DEFAULT_LOCALE)
            .cloned()
            .unwrap_or_else(|| LocaleInfo::new(DEFAULT_LOCALE, DEFAULT_LOCALE, DEFAULT_LOCALE));

        let service = Self {
            root,
            locales,
            current: RwLock::new(default),
            translations: RwLock::new(HashMap::new()),
            cache: RwLock::new(HashMap::new()),
            counters: RwLock::new(Counters::default()),
        };
        match service.load_locale(DEFAULT_LOCALE) {
            Ok(table) => {
                *service.translations.write() = table;
                info!(locale = DEFAULT_LOCALE, "Default locale loaded");
            }
            Err(e) => error!(error = %e, "Failed to load default locale"),
        }
        Ok(service)
    }

    fn file_path(&self, code: &str) -> PathBuf {
        self.root.join(format!("{}.json", code))
    }

    fn load_locale(&self, code: &str) -> Result<HashMap<String, String>> {
        if let Some(cached) = self.cache.read().get(code) {
            debug!(locale = code, "Loaded locale from cache");
            return Ok(cached.clone());
        }
        let path = self.file_path(code);
        if !path.exists() {
            warn!(locale = code, "Locale file not found, creating empty");
            let empty = HashMap::new();
            self.save_locale(code, &empty)?;
            return Ok(empty);
        }
        let table: HashMap<String, String> = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        info!(locale = code, count = table.len(), "Loaded translations");
        self.cache.write().insert(code.to_string(), table.clone());
        Ok(table)
    }

    /// Write a full table for a locale and refresh the cache
    pub fn save_locale(&self, code: &str, table: &HashMap<String, String>) -> Result<()> {
        let sorted: BTreeMap<&String, &String> = table.iter().collect();
        std::fs::write(self.file_path(code), serde_json::to_string_pretty(&sorted)?)?;
        self.cache.write().insert(code.to_string(), table.clone());
        if self.current.read().code == code {
            *self.translations.write() = table.clone();
        }
        Ok(())
    }

    pub fn current_locale(&self) -> LocaleInfo {
        self.current.read().clone()
    }

    pub fn available_locales(&self) -> &[LocaleInfo] {
        &self.locales
    }

    pub fn is_right_to_left(&self) -> bool {
        self.current.read().right_to_left
    }

    /// Translation for `key`; falls back to `fallback`, then `[key]`
    pub fn get_string(&self, key: &str, fallback: Option<&str>) -> String {
        *self.counters.write().key_access.entry(key.to_string()).or_insert(0) += 1;
        if let Some(value) = self.translations.read().get(key) {
            if !value.trim().is_empty() {
                return value.clone();
            }
        }
        self.counters.write().missing += 1;
        debug!(key, locale = %self.current.read().code, "Missing translation");
        fallback.map_or_else(|| format!("[{}]", key), str::to_string)
    }

    pub fn get_formatted(&self, key: &str, args: &[&dyn Display]) -> String {
        format_positional(&self.get_string(key, None), args)
    }

    /// Uses `key.singular` when count is 1 and `key.plural` otherwise,
    /// falling back to `key`. The count is `{0}`; `args` follow it.
    pub fn get_plural(&self, key: &str, count: i64, args: &[&dyn Display]) -> String {
        let variant = if count == 1 {
            format!("{}.singular", key)
        } else {
            format!("{}.plural", key)
        };
        let base = self.get_string(key, None);
        let template = self.get_string(&variant, Some(&base));
        let mut all: Vec<&dyn Display> = Vec::with_capacity(args.len() + 1);
        all.push(&count);
        all.extend_from_slice(args);
        format_positional(&template, &all)
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.translations.read().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.translations.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.keys().into_iter().filter(|k| k.starts_with(prefix)).collect()
    }

    /// Switch locale; unknown codes and unreadable files leave the current
    /// locale in place and return false
    pub fn set_locale(&self, code: &str) -> bool {
        let Some(locale) = self.locales.iter().find(|l| l.code == code).cloned() else {
            warn!(locale = code, "Locale not available");
            return false;
        };
        let started = Instant::now();
        let previous = self.current.read().code.clone();
        match self.load_locale(code) {
            Ok(table) => {
                *self.translations.write() = table;
                *self.current.write() = locale;
                let mut counters = self.counters.write();
                counters.locale_changes += 1;
                counters.last_locale_change = started.elapsed();
                info!(from = %previous, to = code, "Locale changed");
                true
            }
            Err(e) => {
                error!(locale = code, error = %e, "Failed to change locale");
                false
            }
        }
    }

    /// Drop the cached table for the current locale and read it again
    pub fn reload(&self) -> Result<()> {
        let started = Instant::now();
        let code = self.current.read().code.clone();
        self.cache.write().remove(&code);
        let table = self.load_locale(&code)?;
        info!(locale = %code, count = table.len(), "Reloaded locale");
        *self.translations.write() = table;
        let mut counters = self.counters.write();
        counters.reloads += 1;
        counters.last_reload = started.elapsed();
        Ok(())
    }

    pub fn stats(&self) -> LocalizationStats {
        let translations = self.translations.read();
        let counters = self.counters.read();
        LocalizationStats {
            current_locale: self.current.read().code.clone(),
            available_locales: self.locales.len(),
            total_keys: translations.len(),
            translated_keys: translations.values().filter(|v| !v.trim().is_empty()).count(),
            missing_translations: counters.missing,
            locale_changes: counters.locale_changes,
            reloads: counters.reloads,
            last_locale_change: counters.last_locale_change,
            last_reload: counters.last_reload,
            key_access_counts: counters.key_access.clone(),
        }
    }
}
