//! Integration tests for folding batches into the block store.
//!
//! These exercise the full flow from payload bytes through the reader into
//! the block and back out through lookups.

use std::sync::Arc;
use std::thread;

use cadenza::error::{CadenzaError, LookupError};
use cadenza::reader::parse_selector;
use cadenza::{Block, LabelSet, LineReader, MetricPoint, Reader};

fn payload(timestamp: i64, code_200: f64, code_422: f64) -> String {
    format!(
        "{timestamp}
# HELP http_requests_total The total number of HTTP requests.
# TYPE http_requests_total gauge
http_requests_total{{method=\"post\",code=\"200\"}} {code_200}
http_requests_total{{method=\"post\",code=\"422\"}} {code_422}
"
    )
}

fn selector(text: &str) -> (String, LabelSet) {
    parse_selector(text).unwrap()
}

#[test]
fn test_successive_batches_accumulate_in_order() -> cadenza::Result<()> {
    let block = Block::new();
    let reader = LineReader::new();

    for (ts, ok, bad) in [
        (978_595_200, 1027.0, 1.0),
        (978_595_260, 1100.0, 3.0),
        (978_595_320, 1180.0, 3.0),
    ] {
        block.ingest(reader.read(payload(ts, ok, bad).as_bytes())?);
    }

    let (name, labels) = selector(r#"http_requests_total{code="200",method="post"}"#);
    let series = block.lookup(&name, &labels)?;

    let timestamps: Vec<_> = series.points().iter().map(MetricPoint::timestamp).collect();
    let values: Vec<_> = series.points().iter().map(MetricPoint::value).collect();
    assert_eq!(timestamps, vec![978_595_200, 978_595_260, 978_595_320]);
    assert_eq!(values, vec![1027.0, 1100.0, 1180.0]);
    assert_eq!(series.labels(), &labels);
    assert_eq!(
        series.definition().help.as_deref(),
        Some("The total number of HTTP requests.")
    );

    let stats = block.stats();
    assert_eq!(stats.buckets, 1);
    assert_eq!(stats.series, 2);
    assert_eq!(stats.points, 6);
    Ok(())
}

#[test]
fn test_lookup_of_never_ingested_identity() -> cadenza::Result<()> {
    let block = Block::new();
    block.ingest(LineReader::new().read(payload(1, 1.0, 1.0).as_bytes())?);

    for text in [
        r#"http_requests_total{method="post",code="500"}"#,
        r#"http_requests_total{method="post"}"#,
        r#"http_requests_total"#,
        r#"process_cpu_seconds{method="post",code="200"}"#,
    ] {
        let (name, labels) = selector(text);
        match block.lookup(&name, &labels) {
            Err(CadenzaError::Lookup(LookupError::TimeSeriesNotFound { name: missing, .. })) => {
                assert_eq!(missing, name);
            }
            other => panic!("expected not found for {text}, got {other:?}"),
        }
    }
    Ok(())
}

#[test]
fn test_partial_batch_can_still_be_ingested() {
    let block = Block::new();
    let text = "5
# TYPE up gauge
up{job=\"api\"} 1
up{job=\"db\"} 1
up{job=\"api\"} 0
";

    let err = LineReader::new().read(text.as_bytes()).unwrap_err();
    assert_eq!(err.line, 5);

    let summary = block.ingest(err.into_partial());
    assert_eq!(summary.points, 2);
    assert_eq!(block.stats().series, 2);
}

#[test]
fn test_parallel_ingest_of_unrelated_names() {
    let block = Arc::new(Block::new());

    let workers: Vec<_> = (0..8)
        .map(|worker| {
            let block = Arc::clone(&block);
            thread::spawn(move || -> cadenza::Result<()> {
                let reader = LineReader::new();
                for ts in 0..25 {
                    let text = format!(
                        "{ts}\n\
                         # TYPE worker_{worker}_jobs gauge\n\
                         worker_{worker}_jobs{{state=\"busy\"}} {ts}\n"
                    );
                    block.ingest(reader.read(text.as_bytes())?);
                }
                Ok(())
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap().unwrap();
    }

    let stats = block.stats();
    assert_eq!(stats.series, 8);
    assert_eq!(stats.points, 200);

    for worker in 0..8 {
        let (name, labels) = selector(&format!("worker_{worker}_jobs{{state=\"busy\"}}"));
        let series = block.lookup(&name, &labels).unwrap();
        let timestamps: Vec<_> = series.points().iter().map(MetricPoint::timestamp).collect();
        assert_eq!(timestamps, (0..25).collect::<Vec<i64>>());
    }
}
