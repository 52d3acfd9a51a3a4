use async_trait::async_trait;
use session::{ItemId, ReportClient, ReportError, Ticks};

/// Stands in for the media server, every report ends up in the log.
pub struct LogReporter;

#[async_trait]
impl ReportClient for LogReporter {
    async fn send_playback_start(&self, item: &ItemId, start: Ticks) -> Result<(), ReportError> {
        log::info!("Playback of '{}' started at {}", item, start);
        Ok(())
    }

    async fn send_playback_stop(&self, item: &ItemId, ticks: Ticks) -> Result<(), ReportError> {
        log::info!("Playback of '{}' stopped at {}", item, ticks);
        Ok(())
    }

    async fn send_playback_progress(
        &self,
        item: &ItemId,
        ticks: Ticks,
        paused: bool,
    ) -> Result<(), ReportError> {
        log::info!(
            "Playback of '{}' is at {}{}",
            item,
            ticks,
            if paused { " (paused)" } else { "" }
        );
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn never_fails() {
        let id = ItemId::new("a");
        assert!(LogReporter.send_playback_start(&id, Ticks::ZERO).await.is_ok());
        assert!(LogReporter
            .send_playback_progress(&id, Ticks::from_seconds(3), true)
            .await
            .is_ok());
        assert!(LogReporter
            .send_playback_stop(&id, Ticks::from_seconds(5))
            .await
            .is_ok());
    }
}
