use std::time::Duration;

use futures_util::{StreamExt, TryFutureExt};
use log::{error, info, warn};
use poker_core::{ExportFormat, ExportJob, ExportJobStatus, JobId, EXPORT_JOBS_STREAM};
use serde::{Deserialize, Serialize};

use crate::db::{DatabaseError, ExportJobOutcome};
use crate::PokerContext;

const CONSUMER_GROUP: &str = "export-workers";

/// How long a completed artifact's download URL stays valid.
const ARTIFACT_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, Serialize, Deserialize)]
struct ExportJobMessage {
    job_id: JobId,
}

/// Consumes the durable `export-jobs` stream, renders CSV or PDF artifacts
/// for completed sessions, uploads them, and advances job status. Runs as a
/// single long-lived task per process; multiple processes share the
/// consumer group so work is distributed and redelivered on crash.
pub struct ExportWorker {
    context: PokerContext,
    consumer_id: String,
}

impl ExportWorker {
    pub fn new(context: PokerContext, consumer_id: impl Into<String>) -> Self {
        Self {
            context,
            consumer_id: consumer_id.into(),
        }
    }

    pub async fn run(self) {
        let mut stream = match self
            .context
            .bus
            .consume_jobs(EXPORT_JOBS_STREAM, CONSUMER_GROUP, &self.consumer_id)
            .await
        {
            Ok(stream) => stream,
            Err(e) => {
                error!("export worker could not subscribe to {EXPORT_JOBS_STREAM}: {e}");
                return;
            }
        };

        while let Some(message) = stream.next().await {
            let job_id = match serde_json::from_slice::<ExportJobMessage>(&message.payload) {
                Ok(m) => m.job_id,
                Err(e) => {
                    warn!("dropping malformed export job message: {e}");
                    continue;
                }
            };

            if let Err(e) = self.process(job_id).await {
                error!("export job {job_id} failed: {e}");
            }

            if let Err(e) = self
                .context
                .bus
                .ack_job(EXPORT_JOBS_STREAM, CONSUMER_GROUP, message.offset)
                .await
            {
                error!("failed to ack export job {job_id}: {e}");
            }
        }
    }

    async fn process(&self, job_id: JobId) -> Result<(), DatabaseError> {
        let job = self.context.store.export_job_by_id(job_id).await?;

        // A redelivered message that already finished (by this worker or a
        // crashed one that got far enough) acknowledges without re-work. One
        // whose status is still `Processing` is a redelivery of a crash
        // mid-render and falls through to be rendered again.
        if matches!(job.status, ExportJobStatus::Completed | ExportJobStatus::Failed) {
            info!("export job {job_id} already {:?}, skipping", job.status);
            return Ok(());
        }

        let job = if job.status == ExportJobStatus::Pending {
            self.context
                .store
                .set_export_job_status(job_id, ExportJobStatus::Processing, None)
                .await?
        } else {
            job
        };

        match self.render_and_upload(&job).await {
            Ok((url, expires_at)) => {
                self.context
                    .store
                    .set_export_job_status(
                        job_id,
                        ExportJobStatus::Completed,
                        Some(ExportJobOutcome::Completed {
                            download_url: url,
                            expires_at,
                        }),
                    )
                    .await?;
            }
            Err(message) => {
                self.context
                    .store
                    .set_export_job_status(
                        job_id,
                        ExportJobStatus::Failed,
                        Some(ExportJobOutcome::Failed { error_message: message }),
                    )
                    .await?;
            }
        }

        Ok(())
    }

    async fn render_and_upload(
        &self,
        job: &ExportJob,
    ) -> Result<(String, chrono::DateTime<chrono::Utc>), String> {
        let session = self
            .context
            .store
            .session_history_by_id(job.session_id)
            .map_err(|e| e.to_string())
            .await?;

        let rounds = self
            .context
            .store
            .revealed_rounds_for_room(&session.room_id)
            .map_err(|e| e.to_string())
            .await?;

        let mut rows = Vec::new();
        for round in &rounds {
            let votes = self
                .context
                .store
                .votes_for_round(round.id)
                .map_err(|e| e.to_string())
                .await?;

            for vote in &votes {
                let participant = self
                    .context
                    .store
                    .participant_by_id(vote.participant_id)
                    .map_err(|e| e.to_string())
                    .await?;

                rows.push(ExportRow {
                    round_number: round.round_number,
                    story_title: round.story_title.clone().unwrap_or_default(),
                    participant_display_name: participant.display_name,
                    card_value: vote.card_value.clone(),
                    consensus: round.consensus_reached.unwrap_or(false),
                    average: round.average.map(|d| d.to_string()).unwrap_or_default(),
                    median: round.median.clone().unwrap_or_default(),
                });
            }
        }

        rows.sort_by(|a, b| {
            a.round_number
                .cmp(&b.round_number)
                .then_with(|| a.participant_display_name.cmp(&b.participant_display_name))
        });

        let bytes = match job.format {
            ExportFormat::Csv => render_csv(&rows),
            ExportFormat::Pdf => render_pdf(&session.room_id, &rows),
        };

        let key = format!("exports/{job_id}.{ext}", job_id = job.id, ext = extension(job.format));
        let content_type = content_type(job.format);

        let url = self
            .context
            .blob_store
            .put(&key, content_type, bytes)
            .await
            .map_err(|e| format!("upload failed: {e}"))?;

        let expires_at = chrono::Utc::now() + chrono::Duration::from_std(ARTIFACT_TTL).expect("ttl fits");

        Ok((url, expires_at))
    }
}

struct ExportRow {
    round_number: u32,
    story_title: String,
    participant_display_name: String,
    card_value: String,
    consensus: bool,
    average: String,
    median: String,
}

fn extension(format: ExportFormat) -> &'static str {
    match format {
        ExportFormat::Csv => "csv",
        ExportFormat::Pdf => "pdf",
    }
}

fn content_type(format: ExportFormat) -> &'static str {
    match format {
        ExportFormat::Csv => "text/csv",
        ExportFormat::Pdf => "application/pdf",
    }
}

/// RFC 4180 with CRLF terminators, rows already sorted by (round number,
/// participant display name) by the caller.
fn render_csv(rows: &[ExportRow]) -> Vec<u8> {
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::CRLF)
        .from_writer(Vec::new());

    writer
        .write_record(["round", "story", "participant", "card", "consensus", "average", "median"])
        .expect("header row is well-formed");

    for row in rows {
        writer
            .write_record([
                row.round_number.to_string(),
                row.story_title.clone(),
                row.participant_display_name.clone(),
                row.card_value.clone(),
                row.consensus.to_string(),
                row.average.clone(),
                row.median.clone(),
            ])
            .expect("data row is well-formed");
    }

    writer.into_inner().expect("csv writer flushes cleanly")
}

/// A paginated report with the same logical content as the CSV. Layout is
/// implementation-defined; byte output is deterministic given the same rows.
fn render_pdf(room_id: &poker_core::RoomId, rows: &[ExportRow]) -> Vec<u8> {
    use std::io::BufWriter;

    use printpdf::{BuiltinFont, Mm, PdfDocument};

    let (doc, page, layer) = PdfDocument::new(
        format!("Planning poker export - room {room_id}"),
        Mm(210.0),
        Mm(297.0),
        "Layer 1",
    );

    let font = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .expect("builtin font is always available");

    let layer = doc.get_page(page).get_layer(layer);
    let mut y = 280.0;

    layer.use_text(format!("Session report - room {room_id}"), 14.0, Mm(10.0), Mm(y), &font);
    y -= 10.0;

    for row in rows {
        let line = format!(
            "Round {} | {} | {} | {} | consensus={} | avg={} | median={}",
            row.round_number,
            row.story_title,
            row.participant_display_name,
            row.card_value,
            row.consensus,
            row.average,
            row.median,
        );

        layer.use_text(line, 10.0, Mm(10.0), Mm(y), &font);
        y -= 6.0;

        if y < 10.0 {
            break;
        }
    }

    let mut bytes = Vec::new();
    doc.save(&mut BufWriter::new(&mut bytes))
        .expect("pdf document serializes to an in-memory buffer");
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use poker_core::RoomId;

    fn row(round_number: u32, name: &str) -> ExportRow {
        ExportRow {
            round_number,
            story_title: "Login flow".to_string(),
            participant_display_name: name.to_string(),
            card_value: "5".to_string(),
            consensus: true,
            average: "5".to_string(),
            median: "5".to_string(),
        }
    }

    #[test]
    fn csv_uses_crlf_and_header_row() {
        let bytes = render_csv(&[row(1, "Alice")]);
        let text = String::from_utf8(bytes).unwrap();

        assert!(text.starts_with("round,story,participant,card,consensus,average,median\r\n"));
        assert!(text.contains("1,Login flow,Alice,5,true,5,5\r\n"));
    }

    #[test]
    fn pdf_renders_non_empty_bytes() {
        let room_id = RoomId::generate();
        let bytes = render_pdf(&room_id, &[row(1, "Alice"), row(1, "Bob")]);
        assert!(!bytes.is_empty());
    }

    #[test]
    fn export_rows_sort_by_round_then_display_name() {
        let mut rows = vec![row(2, "Zed"), row(1, "Bob"), row(1, "Alice")];
        rows.sort_by(|a, b| {
            a.round_number
                .cmp(&b.round_number)
                .then_with(|| a.participant_display_name.cmp(&b.participant_display_name))
        });

        let names: Vec<_> = rows.iter().map(|r| r.participant_display_name.as_str()).collect();
        assert_eq!(names, vec!["Alice", "Bob", "Zed"]);
    }
}
