#![cfg(feature = "mock")]

use thuto_embed::mock::MockEmbedder;
use thuto_embed::{EmbedError, EmbedServiceConfig, EmbeddingService};

#[tokio::test]
async fn unreachable_backend_fails_connect() {
    let err = EmbeddingService::connect(MockEmbedder::failing(), EmbedServiceConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, EmbedError::ModelUnavailable(_)));
}

#[tokio::test]
async fn backend_lost_after_probe_surfaces_unavailable() {
    let mock = MockEmbedder::new(8).with_fail_after(1);
    let svc = EmbeddingService::connect(mock.clone(), EmbedServiceConfig::default())
        .await
        .unwrap();
    let err = svc.embed("late call").await.unwrap_err();
    assert!(err.is_unavailable());
    assert_eq!(mock.calls(), 2);
}

#[tokio::test]
async fn wrong_dimension_after_probe_is_rejected() {
    // Probe sees 8 dims; a backend switching models mid-flight must not slip through.
    let mock = MockEmbedder::new(8);
    let svc = EmbeddingService::connect(mock, EmbedServiceConfig::default())
        .await
        .unwrap();
    assert_eq!(svc.dim(), 8);

    let wide = MockEmbedder::new(8).with_output_dim(12);
    let config = EmbedServiceConfig {
        expected_dim: Some(8),
        ..EmbedServiceConfig::default()
    };
    let err = EmbeddingService::connect(wide, config).await.unwrap_err();
    assert!(matches!(
        err,
        EmbedError::DimensionMismatch {
            expected: 8,
            actual: 12
        }
    ));
}

#[tokio::test]
async fn slices_are_sent_separately() {
    let mock = MockEmbedder::new(4);
    let config = EmbedServiceConfig {
        batch_size: 2,
        expected_dim: None,
    };
    let svc = EmbeddingService::connect(mock.clone(), config)
        .await
        .unwrap();
    let texts: Vec<String> = (0..5).map(|i| i.to_string()).collect();
    svc.embed_batch(&texts).await.unwrap();
    // 1 probe + ceil(5 / 2) slices
    assert_eq!(mock.calls(), 4);
}
