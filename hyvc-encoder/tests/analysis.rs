mod common;

use common::synthetic_clip;
use hyvc_encoder::{AnalyzerConfig, Frame, RegionAnalyzer};

fn analyze_clip(config: &AnalyzerConfig) -> Vec<hyvc_core::ImportanceMap> {
    let mut analyzer = RegionAnalyzer::new(config.clone());
    synthetic_clip(70, 45, 5)
        .into_iter()
        .enumerate()
        .map(|(i, image)| analyzer.analyze(&Frame::new(i as u32, i as u64 * 40, image)))
        .collect()
}

#[test]
fn test_importance_maps_are_reproducible() {
    let config = AnalyzerConfig::default();
    let first = analyze_clip(&config);
    let second = analyze_clip(&config);
    assert_eq!(first, second);

    for map in &first {
        assert_eq!((map.cols(), map.rows()), (5, 3));
        assert!(map.scores().iter().all(|s| (0.0..=1.0).contains(s)));
        assert!(map.scores().iter().any(|&s| s == 1.0));
    }
}

#[test]
fn test_block_size_changes_grid() {
    let config = AnalyzerConfig {
        block_size: 32,
        ..AnalyzerConfig::default()
    };
    let maps = analyze_clip(&config);
    assert_eq!((maps[0].cols(), maps[0].rows()), (3, 2));
}
