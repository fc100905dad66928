#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::NaiveDate;
use image::{Rgb, RgbImage, RgbaImage};
use tempfile::TempDir;

use statement_pilot::config::{AssetSettings, Config};
use statement_pilot::input::{Desktop, InputDevice, InputError, Pacer};
use statement_pilot::resolver::{ConfidenceLadder, Resolver};
use statement_pilot::runner::Orchestrator;
use statement_pilot::screen::{Hit, Point, Screen, ScreenError, ScreenResult};
use statement_pilot::workflow::AccountDescriptor;

pub const CONTROLS: [&str; 6] = [
    "extrato",
    "periodo",
    "exportar-extrato",
    "radio-button-xls",
    "exportar-extrato-final",
    "trocar-conta",
];

/// 2025-03-14: the calendar end day is "14"
pub fn fixed_today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, 14).expect("valid date")
}

pub fn accounts() -> Vec<AccountDescriptor> {
    vec![
        AccountDescriptor::new("Conta 41930-3", "41930", "Sicoob_41930"),
        AccountDescriptor::new("Conta 41932-0", "41932", "Sicoob_41932"),
        AccountDescriptor::new("Conta 53276-2", "53276", "Sicoob_53276"),
        AccountDescriptor::new("Conta 81117-3", "81117", "Sicoob_81117"),
    ]
}

/// Template stems the workflow looks for, in order, for one account
pub fn expected_steps(account_stem: &str, end_day: &str) -> Vec<String> {
    [
        account_stem,
        "extrato",
        "periodo",
        "1",
        end_day,
        "exportar-extrato",
        "radio-button-xls",
        "exportar-extrato-final",
        "trocar-conta",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

// ============================================================================
// Recorded events
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Find { target: String, confidence: f32 },
    Click(Point),
    Scroll(i32),
    Capture,
}

#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<Event>>>);

impl EventLog {
    pub fn push(&self, event: Event) {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn finds(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Find { target, .. } => Some(target),
                _ => None,
            })
            .collect()
    }

    pub fn clicks(&self) -> Vec<Point> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Click(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    /// Events from the first search for `from` up to the first search for `to`
    pub fn between(&self, from: &str, to: Option<&str>) -> Vec<Event> {
        let events = self.events();
        let is_find = |e: &Event, name: &str| matches!(e, Event::Find { target, .. } if target == name);
        let start = events.iter().position(|e| is_find(e, from)).unwrap_or(events.len());
        let end = to
            .and_then(|to| events.iter().position(|e| is_find(e, to)))
            .unwrap_or(events.len());
        events[start..end.max(start)].to_vec()
    }
}

// ============================================================================
// Scripted screen
// ============================================================================

type Hook = Box<dyn FnMut()>;

/// Finds every template by file stem unless told otherwise
pub struct ScriptedScreen {
    log: EventLog,
    positions: HashMap<String, Point>,
    hidden: HashSet<String>,
    hidden_for: HashMap<String, HashSet<String>>,
    panic_for: Option<(String, String)>,
    failing_capture: bool,
    hooks: Vec<(String, Hook)>,
    current_account: Option<String>,
}

impl ScriptedScreen {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            positions: HashMap::new(),
            hidden: HashSet::new(),
            hidden_for: HashMap::new(),
            panic_for: None,
            failing_capture: false,
            hooks: Vec::new(),
            current_account: None,
        }
    }

    /// Render `stem` at `at`
    pub fn at(mut self, stem: &str, at: Point) -> Self {
        self.positions.insert(stem.to_string(), at);
        self
    }

    /// Never show `stem`
    pub fn hide(mut self, stem: &str) -> Self {
        self.hidden.insert(stem.to_string());
        self
    }

    /// Hide `stem` while `account_stem` is the open account
    pub fn hide_for(mut self, account_stem: &str, stem: &str) -> Self {
        self.hidden_for
            .entry(account_stem.to_string())
            .or_default()
            .insert(stem.to_string());
        self
    }

    /// Panic when `stem` is searched while `account_stem` is open
    pub fn panic_for(mut self, account_stem: &str, stem: &str) -> Self {
        self.panic_for = Some((account_stem.to_string(), stem.to_string()));
        self
    }

    /// Every search fails as if the display had gone away
    pub fn failing_capture(mut self) -> Self {
        self.failing_capture = true;
        self
    }

    /// Run `hook` every time `stem` is found
    pub fn on_found(mut self, stem: &str, hook: impl FnMut() + 'static) -> Self {
        self.hooks.push((stem.to_string(), Box::new(hook)));
        self
    }

    fn visible(&self, stem: &str) -> bool {
        if self.hidden.contains(stem) {
            return false;
        }
        !self
            .current_account
            .as_ref()
            .and_then(|account| self.hidden_for.get(account))
            .is_some_and(|hidden| hidden.contains(stem))
    }
}

impl Screen for ScriptedScreen {
    fn find(&mut self, template: &Path, confidence: f32) -> ScreenResult<Option<Hit>> {
        let stem = template
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        self.log.push(Event::Find {
            target: stem.clone(),
            confidence,
        });

        if self.failing_capture {
            return Err(ScreenError::Capture("display went away".to_string()));
        }
        if stem.starts_with("conta_") {
            self.current_account = Some(stem.clone());
        }
        if let Some((account, target)) = &self.panic_for {
            if self.current_account.as_deref() == Some(account.as_str()) && *target == stem {
                panic!("scripted panic at {}", stem);
            }
        }
        if !self.visible(&stem) {
            return Ok(None);
        }

        for (name, hook) in self.hooks.iter_mut() {
            if *name == stem {
                hook();
            }
        }
        let center = self
            .positions
            .get(&stem)
            .copied()
            .unwrap_or(Point::new(100, 100));
        Ok(Some(Hit { center, score: 1.0 }))
    }

    fn capture(&mut self) -> ScreenResult<RgbaImage> {
        self.log.push(Event::Capture);
        if self.failing_capture {
            return Err(ScreenError::Capture("display went away".to_string()));
        }
        Ok(RgbaImage::new(8, 8))
    }
}

// ============================================================================
// Input and pacing
// ============================================================================

pub struct RecordingInput {
    log: EventLog,
    broken: bool,
}

impl RecordingInput {
    pub fn new(log: EventLog) -> Self {
        Self { log, broken: false }
    }

    pub fn broken(log: EventLog) -> Self {
        Self { log, broken: true }
    }
}

impl InputDevice for RecordingInput {
    fn click(&mut self, at: Point) -> Result<(), InputError> {
        if self.broken {
            return Err(InputError::Action {
                action: "click",
                reason: "pointer device disconnected".to_string(),
            });
        }
        self.log.push(Event::Click(at));
        Ok(())
    }

    fn scroll(&mut self, amount: i32) -> Result<(), InputError> {
        if self.broken {
            return Err(InputError::Action {
                action: "scroll",
                reason: "pointer device disconnected".to_string(),
            });
        }
        self.log.push(Event::Scroll(amount));
        Ok(())
    }
}

/// Records requested waits without sleeping
#[derive(Debug, Clone, Default)]
pub struct NullPacer(Arc<Mutex<Vec<Duration>>>);

impl NullPacer {
    pub fn total(&self) -> Duration {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).iter().sum()
    }
}

impl Pacer for NullPacer {
    fn pause(&mut self, duration: Duration) {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).push(duration);
    }
}

pub fn desktop(screen: ScriptedScreen, input: RecordingInput) -> Desktop {
    Desktop::new(Box::new(screen), Box::new(input), Box::new(NullPacer::default()))
}

// ============================================================================
// Asset tree
// ============================================================================

/// A temporary `botoes/`, `botoes/contas/`, `dias/` tree of small PNGs
pub struct AssetTree {
    pub dir: TempDir,
    pub settings: AssetSettings,
}

impl AssetTree {
    /// Every control, day "1" and `days`, plus a label image per account
    pub fn complete(accounts: &[AccountDescriptor], days: &[&str]) -> Self {
        let tree = Self::empty();
        for control in CONTROLS {
            tree.add_control(control);
        }
        tree.add_day("1");
        for day in days {
            tree.add_day(day);
        }
        for account in accounts {
            tree.add_account(account);
        }
        tree
    }

    pub fn empty() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = AssetSettings::under(dir.path().join("img_automacao"));
        for root in [&settings.controls_dir, &settings.days_dir, &settings.accounts_dir] {
            fs::create_dir_all(root).expect("create asset dir");
        }
        Self { dir, settings }
    }

    pub fn add_control(&self, name: &str) -> PathBuf {
        write_png(&self.settings.controls_dir.join(format!("{}.png", name)))
    }

    pub fn add_day(&self, name: &str) -> PathBuf {
        write_png(&self.settings.days_dir.join(format!("{}.png", name)))
    }

    pub fn add_account(&self, account: &AccountDescriptor) -> PathBuf {
        let name = account.target_name(&self.settings.label_prefix);
        write_png(&self.settings.accounts_dir.join(format!("{}.png", name)))
    }

    pub fn remove_control(&self, name: &str) {
        fs::remove_file(self.settings.controls_dir.join(format!("{}.png", name)))
            .expect("remove control");
    }

    pub fn scratch(&self, name: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::create_dir_all(&path).expect("create scratch dir");
        path
    }
}

fn write_png(path: &Path) -> PathBuf {
    RgbImage::from_pixel(4, 4, Rgb([30, 90, 200]))
        .save(path)
        .expect("write template");
    path.to_path_buf()
}

/// Defaults with the tree's assets and no waiting anywhere
pub fn test_config(tree: &AssetTree) -> Config {
    let mut config = Config::defaults();
    config.assets = tree.settings.clone();
    config.run.countdown = Duration::ZERO;
    config
}

pub fn orchestrator(config: &Config, diagnostics: &Path) -> Orchestrator {
    let ladder = ConfidenceLadder::new(config.matching.min_confidence, config.matching.ladder_step);
    let catalog = statement_pilot::catalog::AssetCatalog::new(config.assets.clone());
    let resolver = Resolver::new(catalog, ladder).with_diagnostics(diagnostics);
    Orchestrator::new(config, resolver).with_clock(fixed_today)
}
