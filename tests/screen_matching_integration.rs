//! Resolver tests on a drawn virtual display with the real pixel matcher

mod support;

use image::{DynamicImage, RgbImage};
use pretty_assertions::assert_eq;
use std::fs;
use std::path::Path;
use std::time::Duration;

use statement_pilot::catalog::AssetCatalog;
use statement_pilot::input::{Desktop, ThreadPacer};
use statement_pilot::resolver::{ConfidenceLadder, Lookup, Resolver, RetryPolicy};
use statement_pilot::screen::{LiveScreen, PixelMatcher, Point, VirtualDisplay};

use support::{AssetTree, EventLog, RecordingInput};

const BACKGROUND: [u8; 3] = [235, 235, 235];
const INK: [u8; 3] = [20, 40, 90];

/// A portal-like page with an account label, a tab and a shaded button
fn portal() -> VirtualDisplay {
    let mut display = VirtualDisplay::with_color(320, 200, BACKGROUND);
    display.draw_text(16, 24, "Conta 41930-3", INK, BACKGROUND);
    display.draw_text(200, 24, "Extrato", INK, BACKGROUND);
    display.draw_rect(40, 120, 48, 16, [200, 200, 200]);
    display
}

fn save(img: &RgbImage, path: &Path) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    img.save(path).unwrap();
}

fn desktop_for(display: VirtualDisplay) -> Desktop {
    Desktop::new(
        Box::new(LiveScreen::new(display, PixelMatcher)),
        Box::new(RecordingInput::new(EventLog::default())),
        Box::new(ThreadPacer),
    )
}

fn policy(confidence: f32) -> RetryPolicy {
    RetryPolicy::new(confidence, 2, Duration::ZERO)
}

fn resolver(tree: &AssetTree, minimum: f32) -> Resolver {
    let catalog = AssetCatalog::new(tree.settings.clone());
    Resolver::new(catalog, ConfidenceLadder::new(minimum, 0.1))
}

#[test]
fn test_locates_drawn_control() {
    let display = portal();
    let tree = AssetTree::empty();
    save(
        &display.crop(200, 24, 56, 8),
        &tree.settings.controls_dir.join("extrato.png"),
    );

    let resolver = resolver(&tree, 0.7);
    let mut desktop = desktop_for(display);
    let lookup = resolver.locate(&mut desktop, "extrato", &policy(0.9)).unwrap();

    let hit = lookup.found().expect("extrato should be on screen");
    assert_eq!(hit.location, Point::new(228, 28));
    assert_eq!(hit.confidence, 0.9);
    assert_eq!(hit.attempts, 1);
    assert!(hit.score > 0.999);
}

#[test]
fn test_account_label_found_through_spelling_variant() {
    let display = portal();
    let tree = AssetTree::empty();
    // captured with a thousands separator in the file name
    save(
        &display.crop(16, 24, 104, 8),
        &tree.settings.accounts_dir.join("conta_41.930-3.png"),
    );

    let resolver = resolver(&tree, 0.7);
    let mut desktop = desktop_for(display);
    let lookup = resolver.locate(&mut desktop, "conta_41930-3", &policy(0.7)).unwrap();

    let hit = lookup.found().expect("label should be on screen");
    assert!(hit.candidate.ends_with("conta_41.930-3.png"));
    assert_eq!(hit.location, Point::new(68, 28));
}

#[test]
fn test_ladder_accepts_drift_down_to_minimum_only() {
    let display = portal();
    let tree = AssetTree::empty();
    // captured with every third glyph pixel lost to smoothing: scores ~0.75
    let mut smudged = display.crop(200, 24, 56, 8);
    for (x, y, px) in smudged.enumerate_pixels_mut() {
        if (x + 3 * y) % 3 == 0 {
            *px = image::Rgb(BACKGROUND);
        }
    }
    save(&smudged, &tree.settings.controls_dir.join("extrato.png"));

    let mut desktop = desktop_for(display.clone());
    match resolver(&tree, 0.8).locate(&mut desktop, "extrato", &policy(0.9)).unwrap() {
        Lookup::NotFound(miss) => {
            assert_eq!(miss.lowest_confidence, 0.8);
            // one candidate, two rungs, two tries
            assert_eq!(miss.attempts, 4);
            assert_eq!(miss.diagnostic, None);
        }
        other => panic!("expected a miss, got {:?}", other),
    }

    let mut desktop = desktop_for(display);
    let lookup = resolver(&tree, 0.7).locate(&mut desktop, "extrato", &policy(0.9)).unwrap();
    let hit = lookup.found().expect("smudged tab within the ladder");
    assert_eq!(hit.confidence, 0.7);
    assert!(hit.score >= 0.7 && hit.score < 0.8);
    assert_eq!(hit.location, Point::new(228, 28));
    assert_eq!(hit.attempts, 5);
}

#[test]
fn test_absent_text_in_page_colors_is_not_found() {
    let tree = AssetTree::empty();
    let mut elsewhere = VirtualDisplay::with_color(80, 16, BACKGROUND);
    elsewhere.draw_text(0, 0, "Trocar", INK, BACKGROUND);
    save(
        &elsewhere.crop(0, 0, 48, 8),
        &tree.settings.controls_dir.join("trocar-conta.png"),
    );

    let mut desktop = desktop_for(portal());
    let lookup = resolver(&tree, 0.7)
        .locate(&mut desktop, "trocar-conta", &policy(0.9))
        .unwrap();

    match lookup {
        Lookup::NotFound(miss) => {
            assert_eq!(miss.lowest_confidence, 0.7);
            assert_eq!(miss.attempts, 6);
        }
        other => panic!("same-colored text must not stand in for trocar-conta: {:?}", other),
    }
}

#[test]
fn test_absent_control_saves_diagnostic() {
    let tree = AssetTree::empty();
    let mut elsewhere = VirtualDisplay::with_color(80, 16, [0, 0, 0]);
    elsewhere.draw_text(0, 0, "Trocar", [255, 255, 0], [0, 0, 0]);
    save(
        &elsewhere.crop(0, 0, 48, 8),
        &tree.settings.controls_dir.join("trocar-conta.png"),
    );
    let diagnostics = tree.scratch("diag");

    let resolver = resolver(&tree, 0.7).with_diagnostics(&diagnostics);
    let mut desktop = desktop_for(portal());
    let lookup = resolver.locate(&mut desktop, "trocar-conta", &policy(0.9)).unwrap();

    let Lookup::NotFound(miss) = lookup else {
        panic!("trocar-conta is not drawn on the portal");
    };
    assert_eq!(miss.attempts, 6);
    let shot = miss.diagnostic.expect("diagnostic screenshot");
    assert!(shot.exists());
    assert!(shot.file_name().unwrap().to_string_lossy().starts_with("debug_trocar-conta_"));
    let saved = image::open(&shot).unwrap();
    assert_eq!((saved.width(), saved.height()), (320, 200));
    assert!(shot.with_extension("json").exists());
}

#[test]
fn test_unusable_files_are_not_candidates() {
    let tree = AssetTree::empty();
    fs::write(tree.settings.controls_dir.join("periodo.png"), b"not an image").unwrap();
    fs::write(tree.settings.controls_dir.join("periodo.jpg"), b"").unwrap();

    let resolver = resolver(&tree, 0.7);
    let mut desktop = desktop_for(portal());
    let lookup = resolver.locate(&mut desktop, "periodo", &policy(0.9)).unwrap();

    assert_eq!(
        lookup,
        Lookup::NoCandidate {
            target: "periodo".to_string()
        }
    );
}

#[test]
fn test_broken_file_is_passed_over_for_decodable_variant() {
    let display = portal();
    let tree = AssetTree::empty();
    fs::write(tree.settings.controls_dir.join("extrato.png"), b"garbage").unwrap();
    let tab = DynamicImage::ImageRgb8(display.crop(200, 24, 56, 8));
    tab.save(tree.settings.controls_dir.join("extrato.jpeg")).unwrap();

    let resolver = resolver(&tree, 0.7);
    let mut desktop = desktop_for(display);
    let lookup = resolver.locate(&mut desktop, "extrato", &policy(0.9)).unwrap();

    // jpeg is lossy
    let hit = lookup.found().expect("jpeg template should match");
    assert!(hit.candidate.ends_with("extrato.jpeg"));
    assert!(hit.score >= 0.7);
}
