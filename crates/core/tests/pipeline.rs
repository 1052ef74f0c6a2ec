use datasheet_search_core::{
    CharacterNgramEmbedder, ComponentMetadata, EmbeddingError, EmbeddingHandle, EngineConfig,
    IngestRequest, IngestStatus, SearchEngine, SearchError, SearchOutcome, DEFAULT_COLLECTION,
};
use std::sync::Arc;

type NgramEngine = SearchEngine<EmbeddingHandle<CharacterNgramEmbedder>>;

fn engine() -> NgramEngine {
    let config = EngineConfig::default();
    let provider = EmbeddingHandle::new(CharacterNgramEmbedder::default(), config.max_input_chars);
    let engine = SearchEngine::new(Arc::new(provider), config).unwrap();
    engine.create_collection(DEFAULT_COLLECTION).unwrap();
    engine
}

fn metadata(category: &str, manufacturer: &str, mpn: &str) -> ComponentMetadata {
    ComponentMetadata {
        category: Some(category.to_string()),
        manufacturer: Some(manufacturer.to_string()),
        mpn: Some(mpn.to_string()),
    }
}

/// 90 sentences of 50 characters, one paragraph.
fn register_map_text() -> String {
    (0..90)
        .map(|index| format!("Register {index:02} controls the GPIO matrix routing now. "))
        .collect::<String>()
        .trim_end()
        .to_string()
}

fn esp32_datasheet() -> IngestRequest {
    IngestRequest::new(
        "esp32-wroom-32.pdf",
        "ESP32-WROOM-32 datasheet. The module is a powerful WiFi and Bluetooth microcontroller \
         for low-power sensor networks.\n\n\
         The WiFi radio supports 802.11 b/g/n with data rates up to 150 Mbps.\n\n\
         Operating voltage is 3.0 V to 3.6 V with a recommended 500 mA supply.\n\
         \u{000c}\
         The dual-core Xtensa processor runs at up to 240 MHz.\n\n\
         Peripherals include SPI, I2C, I2S, UART, ADC and capacitive touch sensors.",
    )
    .with_metadata(metadata("microcontroller", "Espressif", "ESP32-WROOM-32"))
}

fn bme280_datasheet() -> IngestRequest {
    IngestRequest::new(
        "bme280.pdf",
        "BME280 combined humidity, pressure and temperature sensor.\n\n\
         The sensor communicates over I2C and SPI with a supply current of 3.6 uA at 1 Hz.",
    )
    .with_metadata(metadata("sensor", "Bosch", "BME280"))
}

#[tokio::test]
async fn long_document_splits_into_three_overlapping_chunks() {
    let engine = engine();
    let text = register_map_text();
    assert_eq!(text.chars().count(), 4_499);

    let report = engine
        .ingest(
            DEFAULT_COLLECTION,
            IngestRequest::new("registers.pdf", text)
                .with_metadata(metadata("microcontroller", "Espressif", "ESP32")),
        )
        .await
        .unwrap();
    assert_eq!(report.status, IngestStatus::Complete);
    assert_eq!(report.chunk_ids.len(), 3);

    let outcome = engine
        .search(DEFAULT_COLLECTION, "GPIO matrix register", 10, None)
        .await
        .unwrap();
    let mut ranges: Vec<(usize, usize)> = outcome
        .results()
        .iter()
        .map(|result| result.provenance.normalized_range)
        .collect();
    ranges.sort_unstable();

    assert_eq!(ranges.len(), 3);
    assert_eq!(ranges[0].0, 0);
    assert_eq!(ranges[2].1, 4_499);
    for pair in ranges.windows(2) {
        let (first, second) = (pair[0], pair[1]);
        assert!(second.0 <= first.1 - 200);
        assert!(first.1 - first.0 <= 2_000);
    }
}

#[tokio::test]
async fn category_scoped_search_finds_the_microcontroller() {
    let engine = engine();
    engine.ingest(DEFAULT_COLLECTION, esp32_datasheet()).await.unwrap();
    engine.ingest(DEFAULT_COLLECTION, bme280_datasheet()).await.unwrap();

    let outcome = engine
        .search(DEFAULT_COLLECTION, "WiFi microcontroller", 5, Some("microcontroller"))
        .await
        .unwrap();
    let results = outcome.results();

    assert!(!results.is_empty());
    assert!(results
        .iter()
        .all(|result| result.metadata.category.as_deref() == Some("microcontroller")));
    if results.len() > 1 {
        assert!(results[0].score >= results[1].score);
    }
    assert_eq!(results[0].metadata.mpn.as_deref(), Some("ESP32-WROOM-32"));
    assert_eq!(results[0].provenance.document_id, "esp32-wroom-32.pdf");
}

#[tokio::test]
async fn scores_are_non_increasing_with_ids_breaking_ties() {
    let engine = engine();
    engine.ingest(DEFAULT_COLLECTION, esp32_datasheet()).await.unwrap();
    engine.ingest(DEFAULT_COLLECTION, bme280_datasheet()).await.unwrap();

    let outcome = engine
        .search(DEFAULT_COLLECTION, "supply voltage", 10, None)
        .await
        .unwrap();
    for pair in outcome.results().windows(2) {
        assert!(pair[0].score >= pair[1].score);
        if pair[0].score == pair[1].score {
            assert!(pair[0].chunk_id < pair[1].chunk_id);
        }
    }
    let ranks: Vec<usize> = outcome.results().iter().map(|result| result.rank).collect();
    assert_eq!(ranks, (1..=ranks.len()).collect::<Vec<_>>());
}

#[tokio::test]
async fn filter_returns_all_matches_when_fewer_than_k() {
    let engine = engine();
    engine.ingest(DEFAULT_COLLECTION, esp32_datasheet()).await.unwrap();
    let sensor = engine.ingest(DEFAULT_COLLECTION, bme280_datasheet()).await.unwrap();

    let outcome = engine
        .search(DEFAULT_COLLECTION, "humidity", 50, Some("sensor"))
        .await
        .unwrap();

    let mut returned: Vec<String> = outcome
        .into_results()
        .into_iter()
        .map(|result| result.chunk_id)
        .collect();
    let mut expected = sensor.chunk_ids.clone();
    returned.sort_unstable();
    expected.sort_unstable();
    assert_eq!(returned, expected);
}

#[tokio::test]
async fn reingesting_identical_bytes_changes_nothing() {
    let engine = engine();
    let first = engine.ingest(DEFAULT_COLLECTION, esp32_datasheet()).await.unwrap();
    let before = engine.stats(DEFAULT_COLLECTION).await.unwrap();

    let second = engine.ingest(DEFAULT_COLLECTION, esp32_datasheet()).await.unwrap();
    let after = engine.stats(DEFAULT_COLLECTION).await.unwrap();

    assert_eq!(first.status, IngestStatus::Complete);
    assert_eq!(second.status, IngestStatus::AlreadyIndexed);
    assert_eq!(first.chunk_ids, second.chunk_ids);
    assert_eq!(first.digest, second.digest);
    assert_eq!(before.chunk_count, after.chunk_count);
    assert_eq!(after.document_count, 1);
}

#[tokio::test]
async fn changed_bytes_are_a_new_document() {
    let engine = engine();
    let first = engine.ingest(DEFAULT_COLLECTION, esp32_datasheet()).await.unwrap();

    let mut revised = esp32_datasheet();
    revised.raw_text.push_str("\n\nRevision 3.4 adds an errata section.");
    let second = engine.ingest(DEFAULT_COLLECTION, revised).await.unwrap();

    assert_eq!(second.status, IngestStatus::Complete);
    assert_ne!(first.digest, second.digest);
    assert!(second
        .chunk_ids
        .iter()
        .all(|chunk_id| !first.chunk_ids.contains(chunk_id)));
    assert_eq!(engine.stats(DEFAULT_COLLECTION).await.unwrap().document_count, 2);
}

#[tokio::test]
async fn deleted_documents_never_come_back_in_search() {
    let engine = engine();
    let esp32 = engine.ingest(DEFAULT_COLLECTION, esp32_datasheet()).await.unwrap();
    engine.ingest(DEFAULT_COLLECTION, bme280_datasheet()).await.unwrap();

    let report = engine
        .delete_document(DEFAULT_COLLECTION, &esp32.digest)
        .await
        .unwrap();
    assert_eq!(report.removed_chunk_count, esp32.chunk_ids.len());

    for query in ["WiFi microcontroller", "Xtensa processor", "sensor"] {
        let outcome = engine
            .search(DEFAULT_COLLECTION, query, 20, None)
            .await
            .unwrap();
        assert!(outcome
            .results()
            .iter()
            .all(|result| result.provenance.document_digest != esp32.digest));
    }
}

#[tokio::test]
async fn empty_collection_and_unmatched_filter_are_not_errors() {
    let engine = engine();
    let outcome = engine
        .search(DEFAULT_COLLECTION, "WiFi", 5, None)
        .await
        .unwrap();
    assert_eq!(outcome, SearchOutcome::Empty);

    engine.ingest(DEFAULT_COLLECTION, esp32_datasheet()).await.unwrap();
    let outcome = engine
        .search(DEFAULT_COLLECTION, "WiFi", 5, Some("power-management"))
        .await
        .unwrap();
    assert!(outcome.is_empty());
}

#[tokio::test]
async fn queries_too_short_to_embed_find_nothing() {
    let engine = engine();
    engine.ingest(DEFAULT_COLLECTION, esp32_datasheet()).await.unwrap();
    engine.ingest(DEFAULT_COLLECTION, bme280_datasheet()).await.unwrap();

    let outcome = engine
        .search(DEFAULT_COLLECTION, "5V", 5, None)
        .await
        .unwrap();
    assert_eq!(outcome, SearchOutcome::Empty);
}

#[tokio::test]
async fn oversized_queries_fail_without_retry() {
    let engine = engine();
    engine.ingest(DEFAULT_COLLECTION, esp32_datasheet()).await.unwrap();

    let query = "x".repeat(10_000);
    let error = engine
        .search(DEFAULT_COLLECTION, &query, 5, None)
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        SearchError::Embedding(EmbeddingError::InputTooLong { len: 10_000, .. })
    ));
    assert!(!error.is_retryable());
}

#[tokio::test]
async fn page_numbers_follow_form_feeds() {
    let engine = engine();
    engine.ingest(DEFAULT_COLLECTION, esp32_datasheet()).await.unwrap();

    let outcome = engine
        .search(DEFAULT_COLLECTION, "dual-core Xtensa processor", 1, None)
        .await
        .unwrap();
    let top = &outcome.results()[0];
    assert!(top.provenance.page_number >= 1);
    assert!(top.provenance.raw_range.0 <= top.provenance.raw_range.1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn searches_run_while_another_collection_ingests() {
    let engine = Arc::new(engine());
    engine.create_collection("bulk").unwrap();
    engine.ingest(DEFAULT_COLLECTION, esp32_datasheet()).await.unwrap();

    let writer = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            for index in 0..20 {
                let request = IngestRequest::new(
                    format!("bulk-{index}.pdf"),
                    format!("{} Revision {index}.", register_map_text()),
                );
                let report = engine.ingest("bulk", request).await.unwrap();
                assert_eq!(report.status, IngestStatus::Complete);
            }
        })
    };

    let readers: Vec<_> = (0..8)
        .map(|_| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                for _ in 0..10 {
                    let outcome = engine
                        .search(DEFAULT_COLLECTION, "WiFi radio", 3, Some("microcontroller"))
                        .await
                        .unwrap();
                    assert!(!outcome.is_empty());
                }
            })
        })
        .collect();

    writer.await.unwrap();
    for reader in readers {
        reader.await.unwrap();
    }

    assert_eq!(engine.stats("bulk").await.unwrap().document_count, 20);
    assert_eq!(engine.latency().searches, 80);
}
