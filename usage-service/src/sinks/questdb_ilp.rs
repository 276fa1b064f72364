use std::net::SocketAddr;

use time::OffsetDateTime;
use tokio::{io::AsyncWriteExt, net::TcpStream};
use usage_client::domain::{StatisticMetadata, StatisticPoint};

use super::{SeriesPoints, SinkError, StatisticsSink};

const MEASUREMENT: &str = "usage_statistics";

/// Escape measurement/tag keys/tag values/field keys for ILP.
///
/// ILP requires escaping commas, spaces and equals with a backslash.
fn ilp_escape_ident(s: &str, out: &mut String) {
    for ch in s.chars() {
        match ch {
            ',' | ' ' | '=' => {
                out.push('\\');
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
}

fn push_tag(out: &mut String, key: &str, value: &str) {
    out.push(',');
    ilp_escape_ident(key, out);
    out.push('=');
    ilp_escape_ident(value, out);
}

fn push_field_f64(out: &mut String, first: &mut bool, key: &str, value: f64) {
    if *first {
        *first = false;
    } else {
        out.push(',');
    }

    ilp_escape_ident(key, out);
    out.push('=');
    out.push_str(&value.to_string());
}

fn ts_to_unix_nanos(ts: OffsetDateTime) -> i128 {
    ts.unix_timestamp_nanos()
}

/// Stable id of one period of one series, so re-sent rows can be deduplicated
/// server side with `DEDUP UPSERT KEYS(ts, event_id)`.
fn event_id(statistic_id: &str, start: OffsetDateTime) -> String {
    let mut h = blake3::Hasher::new();
    h.update(&(statistic_id.len() as u32).to_le_bytes());
    h.update(statistic_id.as_bytes());
    h.update(&ts_to_unix_nanos(start).to_le_bytes());
    h.finalize().to_hex().to_string()
}

fn write_ilp_line(metadata: &StatisticMetadata, point: &StatisticPoint, out: &mut String) {
    out.push_str(MEASUREMENT);

    // tags (SYMBOL columns)
    push_tag(out, "event_id", &event_id(&metadata.statistic_id, point.start));
    push_tag(out, "statistic_id", &metadata.statistic_id);
    push_tag(out, "name", &metadata.name);
    push_tag(out, "source", &metadata.source);
    push_tag(out, "unit", &metadata.unit_of_measurement);

    out.push(' ');
    let mut first = true;
    push_field_f64(out, &mut first, "state", point.state);
    push_field_f64(out, &mut first, "sum", point.sum);

    out.push(' ');
    out.push_str(&ts_to_unix_nanos(point.start).to_string());
}

fn encode_batch(batch: &[SeriesPoints<'_>]) -> Vec<u8> {
    let lines: usize = batch.iter().map(|s| s.points.len()).sum();
    // Heuristic capacity: ~220 bytes per line.
    let mut s = String::with_capacity(lines.saturating_mul(220));
    for series in batch {
        for p in &series.points {
            write_ilp_line(series.metadata, p, &mut s);
            s.push('\n');
        }
    }
    s.into_bytes()
}

/// Write-only statistics sink speaking InfluxDB line protocol to QuestDB.
///
/// ILP cannot be read back, so `last_point` always reports `None` and the
/// coordinator relies on its in-process high-water marks. After a restart the
/// running sums start again from zero, and the dedup upsert on `event_id`
/// overwrites the stored sums of re-fetched hours with the smaller values.
pub struct QuestDbIlpStatisticsSink {
    addr: SocketAddr,
}

impl QuestDbIlpStatisticsSink {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    async fn connect(&self) -> Result<TcpStream, SinkError> {
        let stream = TcpStream::connect(self.addr)
            .await
            .map_err(|e| SinkError::Connect(format!("failed to connect to QuestDB ILP: {e}")))?;
        let _ = stream.set_nodelay(true);
        Ok(stream)
    }
}

#[async_trait::async_trait]
impl StatisticsSink for QuestDbIlpStatisticsSink {
    async fn add_statistics_batch(&self, batch: &[SeriesPoints<'_>]) -> Result<(), SinkError> {
        let points: usize = batch.iter().map(|s| s.points.len()).sum();
        if points == 0 {
            return Ok(());
        }

        // Single payload on a single connection for the whole batch.
        let payload = encode_batch(batch);
        let mut stream = self.connect().await?;

        if let Err(e) = stream.write_all(&payload).await {
            tracing::error!(error = %e, series = batch.len(), "QuestDB ILP write failed");
            metrics::counter!("statistics_sink_errors_total").increment(1);
            return Err(SinkError::Write(format!("ilp write failed: {e}")));
        }

        // Best-effort flush.
        let _ = stream.shutdown().await;

        metrics::counter!("statistics_points_submitted_total").increment(points as u64);
        metrics::counter!("questdb_ilp_bytes_total").increment(payload.len() as u64);
        Ok(())
    }

    async fn last_point(&self, _statistic_id: &str) -> Result<Option<StatisticPoint>, SinkError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn metadata() -> StatisticMetadata {
        StatisticMetadata {
            statistic_id: "salt_river_project:salt_river_project_on_peak_usage".to_string(),
            name: "On Peak Usage".to_string(),
            source: "salt_river_project".to_string(),
            unit_of_measurement: "kWh".to_string(),
            has_mean: false,
            has_sum: true,
        }
    }

    #[test]
    fn ilp_escape_ident_escapes_commas_spaces_and_equals() {
        let mut out = String::new();
        ilp_escape_ident("a b,c=d", &mut out);
        assert_eq!(out, "a\\ b\\,c\\=d");
    }

    #[test]
    fn event_id_depends_on_series_and_period_only() {
        let ts = datetime!(2024-07-01 00:00:00 UTC);

        assert_eq!(event_id("a", ts), event_id("a", ts));
        assert_ne!(event_id("a", ts), event_id("b", ts));
        assert_ne!(event_id("a", ts), event_id("a", datetime!(2024-07-01 01:00:00 UTC)));
    }

    #[test]
    fn statistic_line_includes_tags_fields_and_nanos() {
        let point = StatisticPoint {
            start: datetime!(2024-07-01 01:00:00 UTC),
            state: 3.0,
            sum: 5.25,
        };

        let mut line = String::new();
        write_ilp_line(&metadata(), &point, &mut line);

        assert!(line.starts_with("usage_statistics,event_id="));
        assert!(line.contains(",statistic_id=salt_river_project:salt_river_project_on_peak_usage"));
        assert!(line.contains(",name=On\\ Peak\\ Usage"));
        assert!(line.contains(",unit=kWh"));
        assert!(line.contains(" state=3,sum=5.25 "));
        assert!(line.ends_with(&ts_to_unix_nanos(point.start).to_string()));
    }

    #[test]
    fn batch_is_encoded_into_one_payload() {
        let on_peak = metadata();
        let off_peak = StatisticMetadata {
            statistic_id: "salt_river_project:salt_river_project_off_peak_usage".to_string(),
            name: "Off Peak Usage".to_string(),
            ..metadata()
        };
        let point = |h: u8, sum: f64| StatisticPoint {
            start: datetime!(2024-07-01 00:00:00 UTC) + time::Duration::hours(h.into()),
            state: 1.0,
            sum,
        };
        let batch = [
            SeriesPoints {
                metadata: &on_peak,
                points: vec![point(0, 1.0), point(1, 2.0)],
            },
            SeriesPoints {
                metadata: &off_peak,
                points: vec![point(0, 1.0)],
            },
        ];

        let payload = String::from_utf8(encode_batch(&batch)).unwrap();

        assert_eq!(payload.lines().count(), 3);
        assert_eq!(payload.lines().filter(|l| l.contains("off_peak_usage")).count(), 1);
        assert!(payload.ends_with('\n'));
    }

    #[tokio::test]
    async fn empty_series_does_not_connect() {
        // Nothing listens here; an attempted connect would fail.
        let sink = QuestDbIlpStatisticsSink::new("127.0.0.1:1".parse().unwrap());

        assert!(sink.add_statistics(&metadata(), &[]).await.is_ok());
        assert_eq!(sink.last_point("x").await.unwrap(), None);
    }
}
