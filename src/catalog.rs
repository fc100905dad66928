//! Asset catalog: maps logical target names to template image files.
//!
//! On-disk names drift from what the portal renders ("conta_41930-3.png",
//! "conta_41.930-3.png", "conta_41930_3.png" all show up in practice), so a
//! logical name expands into an ordered list of spelling variants. Each
//! variant is looked up in every asset root and with every image extension;
//! only files that exist, are non-empty and decode as images are returned.
//!
//! An empty result is its own outcome: it means the asset tree is
//! misconfigured, not that the control is missing from the screen.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, trace, warn};

use crate::config::AssetSettings;
use crate::workflow::AccountDescriptor;

/// Why a candidate file was skipped
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum AssetDefect {
    Missing,
    NotAFile,
    Empty,
    Unreadable(String),
    Undecodable(String),
}

impl fmt::Display for AssetDefect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetDefect::Missing => write!(f, "file does not exist"),
            AssetDefect::NotAFile => write!(f, "not a regular file"),
            AssetDefect::Empty => write!(f, "file is empty"),
            AssetDefect::Unreadable(e) => write!(f, "cannot be read: {}", e),
            AssetDefect::Undecodable(e) => write!(f, "not a valid image: {}", e),
        }
    }
}

/// Check that a candidate file exists, is readable and decodes as an image
pub fn inspect_candidate(path: &Path) -> Result<(), AssetDefect> {
    let metadata = match fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(AssetDefect::Missing),
        Err(e) => return Err(AssetDefect::Unreadable(e.to_string())),
    };
    if !metadata.is_file() {
        return Err(AssetDefect::NotAFile);
    }
    if metadata.len() == 0 {
        return Err(AssetDefect::Empty);
    }
    fs::File::open(path).map_err(|e| AssetDefect::Unreadable(e.to_string()))?;
    image::open(path).map_err(|e| AssetDefect::Undecodable(e.to_string()))?;
    Ok(())
}

/// Derive the logical target name for an on-screen account label.
///
/// `"Conta 41930-3"` with prefix `"Conta"` becomes `"conta_41930-3"`.
pub fn account_target_name(label: &str, prefix: &str) -> String {
    let lowered = label.trim().to_lowercase();
    let prefix = prefix.trim().to_lowercase();

    let joined = match lowered.strip_prefix(prefix.as_str()) {
        Some(rest) if !prefix.is_empty() && rest.starts_with(char::is_whitespace) => {
            format!("{}_{}", prefix, rest.trim_start())
        }
        _ => lowered.clone(),
    };

    joined
        .chars()
        .map(|c| match c {
            c if c.is_whitespace() => '_',
            '/' | '\\' => '_',
            c => c,
        })
        .collect()
}

/// Ordered spelling variants for a logical name, exact name first
pub fn name_variants(name: &str) -> Vec<String> {
    let mut out = Vec::new();
    push_unique(&mut out, name.to_string());

    // hyphen <-> underscore
    push_unique(&mut out, name.replace('-', "_"));
    push_unique(&mut out, name.replace('_', "-"));

    // thousands separator inserted or removed
    if let Some(dotted) = with_thousands_separator(name) {
        push_unique(&mut out, dotted);
    }
    push_unique(&mut out, name.replace('.', ""));

    // prefix glued on, dropped, or with punctuation removed
    if let Some((head, tail)) = name.split_once('_') {
        if !head.is_empty() && head.chars().all(|c| c.is_alphabetic()) && !tail.is_empty() {
            push_unique(&mut out, format!("{}{}", head, tail));
            push_unique(&mut out, tail.to_string());
            push_unique(&mut out, format!("{}{}", head, tail.replace(['-', '.'], "")));
        }
    }

    // zero-padded numeric forms
    if !name.is_empty() && name.chars().all(|c| c.is_ascii_digit()) {
        if let Ok(n) = name.parse::<u32>() {
            push_unique(&mut out, format!("{:02}", n));
            push_unique(&mut out, n.to_string());
        }
    }

    out
}

fn push_unique(out: &mut Vec<String>, value: String) {
    if !value.is_empty() && !out.contains(&value) {
        out.push(value);
    }
}

/// Insert `.` thousands separators into the first run of 4+ digits
fn with_thousands_separator(name: &str) -> Option<String> {
    let chars: Vec<char> = name.chars().collect();
    let start = chars.iter().position(|c| c.is_ascii_digit())?;
    let len = chars[start..].iter().take_while(|c| c.is_ascii_digit()).count();
    if len < 4 {
        return None;
    }

    let digits = &chars[start..start + len];
    let mut grouped = String::new();
    for (i, d) in digits.iter().enumerate() {
        if i > 0 && (len - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(*d);
    }

    let head: String = chars[..start].iter().collect();
    let tail: String = chars[start + len..].iter().collect();
    Some(format!("{}{}{}", head, grouped, tail))
}

/// Turn an orphan account file name back into a plausible on-screen label
pub fn suggest_label(stem: &str, prefix: &str) -> Option<String> {
    let lowered = stem.to_lowercase();
    let lowered_prefix = prefix.trim().to_lowercase();

    if !lowered_prefix.is_empty() {
        if let Some(rest) = lowered.strip_prefix(&lowered_prefix) {
            let rest = rest.trim_start_matches(['_', '-', ' ']);
            if !rest.is_empty() {
                return Some(format!("{} {}", prefix.trim(), rest.replace('_', "-")));
            }
        }
    }

    if !stem.is_empty()
        && stem.chars().all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '_'))
        && stem.chars().any(|c| c.is_ascii_digit())
    {
        return Some(format!("{} {}", prefix.trim(), stem.replace('_', "-")));
    }

    None
}

/// Resolution and validation status of one target
#[derive(Debug, Clone, Serialize)]
pub struct TargetStatus {
    pub name: String,
    /// On-screen label, for account targets
    pub label: Option<String>,
    pub resolved: Vec<PathBuf>,
    pub rejected: Vec<RejectedCandidate>,
}

impl TargetStatus {
    pub fn is_resolved(&self) -> bool {
        !self.resolved.is_empty()
    }
}

/// A candidate file that exists but cannot be used
#[derive(Debug, Clone, Serialize)]
pub struct RejectedCandidate {
    pub path: PathBuf,
    pub defect: AssetDefect,
}

/// An image in the account directory that no configured account refers to
#[derive(Debug, Clone, Serialize)]
pub struct OrphanAsset {
    pub path: PathBuf,
    pub suggested_label: Option<String>,
}

/// Full report on the asset tree
#[derive(Debug, Clone, Serialize)]
pub struct CatalogAudit {
    pub targets: Vec<TargetStatus>,
    pub accounts: Vec<TargetStatus>,
    pub orphans: Vec<OrphanAsset>,
}

impl CatalogAudit {
    /// Required control targets without a usable file
    pub fn missing_targets(&self) -> Vec<&str> {
        self.targets
            .iter()
            .filter(|t| !t.is_resolved())
            .map(|t| t.name.as_str())
            .collect()
    }

    /// Account labels without a usable file
    pub fn missing_accounts(&self) -> Vec<&str> {
        self.accounts
            .iter()
            .filter(|t| !t.is_resolved())
            .map(|t| t.label.as_deref().unwrap_or(t.name.as_str()))
            .collect()
    }

    /// Whether every required control target resolves
    pub fn is_ready(&self) -> bool {
        self.targets.iter().all(TargetStatus::is_resolved)
    }
}

/// Maps logical names to validated template files
#[derive(Debug)]
pub struct AssetCatalog {
    settings: AssetSettings,
    resolved: Mutex<HashMap<String, Vec<PathBuf>>>,
}

impl AssetCatalog {
    pub fn new(settings: AssetSettings) -> Self {
        Self {
            settings,
            resolved: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &AssetSettings {
        &self.settings
    }

    /// Asset directories in search order
    pub fn roots(&self) -> [&Path; 3] {
        [
            self.settings.controls_dir.as_path(),
            self.settings.days_dir.as_path(),
            self.settings.accounts_dir.as_path(),
        ]
    }

    /// Validated candidate files for `name`, best first.
    ///
    /// The first lookup of a name is remembered for the lifetime of the
    /// catalog. An empty vector means no usable file exists.
    pub fn resolve_candidates(&self, name: &str) -> Vec<PathBuf> {
        let name = self.strip_extension(name);
        let mut resolved = self.resolved.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(hit) = resolved.get(name) {
            return hit.clone();
        }

        let status = self.inspect(name, None);
        for rejected in &status.rejected {
            warn!(
                target_name = name,
                path = %rejected.path.display(),
                defect = %rejected.defect,
                "skipping unusable template file"
            );
        }
        debug!(target_name = name, candidates = status.resolved.len(), "resolved template candidates");

        resolved.insert(name.to_string(), status.resolved.clone());
        status.resolved
    }

    /// Check required control targets and every account label
    pub fn audit(&self, required: &[String], accounts: &[AccountDescriptor]) -> CatalogAudit {
        let targets = required
            .iter()
            .map(|name| self.inspect(self.strip_extension(name), None))
            .collect();

        let mut known: HashSet<String> = HashSet::new();
        let accounts = accounts
            .iter()
            .map(|account| {
                let name = account.target_name(&self.settings.label_prefix);
                known.extend(name_variants(&name));
                self.inspect(&name, Some(account.label.clone()))
            })
            .collect();

        CatalogAudit {
            targets,
            accounts,
            orphans: self.orphans(&known),
        }
    }

    fn inspect(&self, name: &str, label: Option<String>) -> TargetStatus {
        let mut status = TargetStatus {
            name: name.to_string(),
            label,
            resolved: Vec::new(),
            rejected: Vec::new(),
        };

        for variant in name_variants(name) {
            for root in self.roots() {
                for ext in &self.settings.extensions {
                    let path = root.join(format!("{}.{}", variant, ext));
                    if status.resolved.contains(&path) {
                        continue;
                    }
                    match inspect_candidate(&path) {
                        Ok(()) => {
                            if status.resolved.len() < self.settings.max_candidates.max(1) {
                                status.resolved.push(path);
                            }
                        }
                        Err(AssetDefect::Missing) => trace!(path = %path.display(), "no such variant"),
                        Err(defect) => status.rejected.push(RejectedCandidate { path, defect }),
                    }
                }
            }
        }

        status
    }

    fn orphans(&self, known: &HashSet<String>) -> Vec<OrphanAsset> {
        let Ok(entries) = fs::read_dir(&self.settings.accounts_dir) else {
            return Vec::new();
        };

        let mut orphans: Vec<OrphanAsset> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && self.has_image_extension(path))
            .filter_map(|path| {
                let stem = path.file_stem()?.to_string_lossy().to_string();
                if known.contains(&stem) {
                    return None;
                }
                let suggested_label = suggest_label(&stem, &self.settings.label_prefix);
                Some(OrphanAsset {
                    path,
                    suggested_label,
                })
            })
            .collect();
        orphans.sort_by(|a, b| a.path.cmp(&b.path));
        orphans
    }

    fn has_image_extension(&self, path: &Path) -> bool {
        path.extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .map(|e| self.settings.extensions.iter().any(|x| *x == e))
            .unwrap_or(false)
    }

    fn strip_extension<'a>(&self, name: &'a str) -> &'a str {
        for ext in &self.settings.extensions {
            if let Some(stem) = name.strip_suffix(&format!(".{}", ext)) {
                return stem;
            }
        }
        name
    }
}
