//! Query-path scenarios: aggregation strategies, ranking determinism,
//! tie-breaking, score bounds, and service statistics.

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use artmatch::{
    AggregationStrategy, ArtistRecord, Brief, Config, Recommender,
};
use common::{scored_png, FixtureServer, Route, ScriptedEncoder};
use tempfile::tempdir;

const EPS: f32 = 1e-3;

fn engine_with(config: Config) -> Recommender {
    Recommender::with_encoder(config, Arc::new(ScriptedEncoder::new())).unwrap()
}

/// Fixture serving four illustrations scoring 0.9 / 0.8 / 0.7 / 0.1.
fn reference_portfolio_server() -> FixtureServer {
    FixtureServer::start(HashMap::from([
        ("/i90.png".to_string(), Route::Png(scored_png(90))),
        ("/i80.png".to_string(), Route::Png(scored_png(80))),
        ("/i70.png".to_string(), Route::Png(scored_png(70))),
        ("/i10.png".to_string(), Route::Png(scored_png(10))),
    ]))
}

fn reference_urls(server: &FixtureServer) -> Vec<String> {
    vec![
        server.url("/i90.png"),
        server.url("/i80.png"),
        server.url("/i70.png"),
        server.url("/i10.png"),
    ]
}

#[test]
fn aggregation_strategies_match_reference_values() {
    let server = reference_portfolio_server();

    let cases = [
        (AggregationStrategy::Max, 0.9f32),
        (AggregationStrategy::Mean, 0.625),
        (AggregationStrategy::TopKMean, 0.8),
        (AggregationStrategy::WeightedMean, 0.78),
    ];

    for (strategy, expected) in cases {
        let dir = tempdir().unwrap();
        let engine = engine_with(Config {
            cache_dir: dir.path().to_path_buf(),
            aggregation: strategy,
            top_k_illustrations: 3,
            ..Default::default()
        });

        engine
            .initialize(vec![ArtistRecord::new(1, "Ref", reference_urls(&server))])
            .unwrap();

        let results = engine.recommend("reference brief", 1).unwrap();
        assert_eq!(results.len(), 1);
        assert!(
            (results[0].score - expected).abs() < EPS,
            "{strategy}: expected {expected}, got {}",
            results[0].score
        );
        assert_eq!(results[0].aggregation_strategy, strategy);
        assert_eq!(results[0].num_illustrations, 4);
        assert_eq!(
            results[0].top_illustration_url,
            server.url("/i90.png"),
            "best illustration is strategy-independent"
        );
    }
}

#[test]
fn equal_scores_break_ties_by_ascending_id() {
    let dir = tempdir().unwrap();
    let server = FixtureServer::start(HashMap::from([
        ("/ten.png".to_string(), Route::Png(scored_png(50))),
        ("/two.png".to_string(), Route::Png(scored_png(50))),
    ]));

    let engine = engine_with(Config {
        cache_dir: dir.path().to_path_buf(),
        ..Default::default()
    });
    engine
        .initialize(vec![
            ArtistRecord::new(10, "Ten", vec![server.url("/ten.png")]),
            ArtistRecord::new(2, "Two", vec![server.url("/two.png")]),
        ])
        .unwrap();

    let results = engine.recommend("tied brief", 2).unwrap();
    assert_eq!(results.len(), 2);
    assert!((results[0].score - results[1].score).abs() < EPS);
    assert_eq!(results[0].artist_id, 2);
    assert_eq!(results[1].artist_id, 10);
}

#[test]
fn recommend_is_deterministic() {
    let dir = tempdir().unwrap();
    let server = FixtureServer::start(HashMap::from([
        ("/a.png".to_string(), Route::Png(scored_png(85))),
        ("/b.png".to_string(), Route::Png(scored_png(42))),
        ("/c.png".to_string(), Route::Png(scored_png(63))),
    ]));

    let engine = engine_with(Config {
        cache_dir: dir.path().to_path_buf(),
        ..Default::default()
    });
    engine
        .initialize(vec![
            ArtistRecord::new(1, "A", vec![server.url("/a.png")]),
            ArtistRecord::new(2, "B", vec![server.url("/b.png")]),
            ArtistRecord::new(3, "C", vec![server.url("/c.png")]),
        ])
        .unwrap();

    let first = engine.recommend("same brief", 3).unwrap();
    for _ in 0..5 {
        assert_eq!(engine.recommend("same brief", 3).unwrap(), first);
    }
}

#[test]
fn scores_stay_in_unit_interval() {
    let dir = tempdir().unwrap();
    // Red channel 0 scripts the worst possible cosine (-1).
    let server = FixtureServer::start(HashMap::from([
        ("/worst.png".to_string(), Route::Png(scored_png(0))),
        ("/best.png".to_string(), Route::Png(scored_png(100))),
    ]));

    let engine = engine_with(Config {
        cache_dir: dir.path().to_path_buf(),
        ..Default::default()
    });
    engine
        .initialize(vec![
            ArtistRecord::new(1, "Worst", vec![server.url("/worst.png")]),
            ArtistRecord::new(2, "Best", vec![server.url("/best.png")]),
        ])
        .unwrap();

    let results = engine.recommend("bounds", 10).unwrap();
    assert_eq!(results.len(), 2);
    for result in &results {
        assert!(
            (0.0..=1.0).contains(&result.score),
            "score out of range: {}",
            result.score
        );
    }
    assert_eq!(results[0].artist_id, 2);
    assert!((results[0].score - 1.0).abs() < EPS);
    assert!(results[1].score.abs() < EPS);
}

#[test]
fn identical_portfolios_score_identically() {
    // Two artists sharing the same image URLs must score the same for
    // any brief, regardless of name differences.
    let dir = tempdir().unwrap();
    let server = FixtureServer::start(HashMap::from([
        ("/x.png".to_string(), Route::Png(scored_png(77))),
        ("/y.png".to_string(), Route::Png(scored_png(33))),
    ]));

    let shared = vec![server.url("/x.png"), server.url("/y.png")];
    let engine = engine_with(Config {
        cache_dir: dir.path().to_path_buf(),
        aggregation: AggregationStrategy::Mean,
        ..Default::default()
    });
    engine
        .initialize(vec![
            ArtistRecord::new(1, "Short name", shared.clone()),
            ArtistRecord::new(2, "A completely different display label", shared),
        ])
        .unwrap();

    let results = engine.recommend("any brief at all", 2).unwrap();
    assert_eq!(results.len(), 2);
    assert!((results[0].score - results[1].score).abs() < f32::EPSILON);
    assert_eq!(results[0].artist_id, 1, "tie broken by id");
}

#[test]
fn top_k_shorter_than_requested_when_few_artists() {
    let dir = tempdir().unwrap();
    let server = FixtureServer::start(HashMap::from([(
        "/only.png".to_string(),
        Route::Png(scored_png(60)),
    )]));

    let engine = engine_with(Config {
        cache_dir: dir.path().to_path_buf(),
        ..Default::default()
    });
    engine
        .initialize(vec![ArtistRecord::new(1, "Solo", vec![server.url("/only.png")])])
        .unwrap();

    let results = engine.recommend("brief", 50).unwrap();
    assert_eq!(results.len(), 1);

    assert!(engine.recommend("brief", 0).unwrap().is_empty());
}

#[test]
fn structured_brief_flattens_to_query() {
    let dir = tempdir().unwrap();
    let server = FixtureServer::start(HashMap::from([(
        "/a.png".to_string(),
        Route::Png(scored_png(88)),
    )]));

    let engine = engine_with(Config {
        cache_dir: dir.path().to_path_buf(),
        ..Default::default()
    });
    engine
        .initialize(vec![ArtistRecord::new(1, "Ana", vec![server.url("/a.png")])])
        .unwrap();

    let brief = Brief {
        title: Some("Board game box art".into()),
        specialty: Some("CONCEPT_ART".into()),
        description: Some("Fantasy tavern scene".into()),
        ..Default::default()
    };
    let results = engine.recommend_brief(&brief, 3).unwrap();
    assert_eq!(results.len(), 1);
    assert!((results[0].score - 0.88).abs() < EPS);
}

#[test]
fn stats_reflect_activity() {
    let dir = tempdir().unwrap();
    let server = FixtureServer::start(HashMap::from([
        ("/a.png".to_string(), Route::Png(scored_png(90))),
        ("/gone.png".to_string(), Route::Status(404)),
    ]));

    let engine = engine_with(Config {
        cache_dir: dir.path().to_path_buf(),
        ..Default::default()
    });
    engine
        .initialize(vec![ArtistRecord::new(
            1,
            "Ana",
            vec![server.url("/a.png"), server.url("/gone.png")],
        )])
        .unwrap();

    engine.recommend("first brief", 5).unwrap();
    engine.recommend("second brief", 5).unwrap();

    let stats = engine.stats();
    assert_eq!(stats.artists_indexed, 1);
    assert!((stats.processing_success_rate - 0.5).abs() < 1e-9);
    assert!(stats.avg_score > 0.0 && stats.avg_score <= 1.0);
    assert!(stats.avg_latency_ms >= 0.0);

    let metrics = engine.metrics();
    assert_eq!(metrics.recommendations, 2);
    assert_eq!(metrics.images_successful, 1);
    assert_eq!(metrics.images_failed, 1);
}

#[test]
fn cache_hit_rate_reported_through_stats() {
    let dir = tempdir().unwrap();
    let server = FixtureServer::start(HashMap::from([(
        "/a.png".to_string(),
        Route::Png(scored_png(70)),
    )]));

    let artists = || vec![ArtistRecord::new(1, "Ana", vec![server.url("/a.png")])];

    let engine = engine_with(Config {
        cache_dir: dir.path().to_path_buf(),
        ..Default::default()
    });
    engine.initialize(artists()).unwrap(); // miss
    engine.reload(artists()).unwrap(); // hit

    let stats = engine.stats();
    assert!((stats.cache_hit_rate - 0.5).abs() < 1e-9, "one miss, one hit");
}
