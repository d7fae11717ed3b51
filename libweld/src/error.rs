pub(crate) use anyhow::Error;
use crossbeam_queue::SegQueue;

pub type Result<T = (), E = Error> = core::result::Result<T, E>;

/// Collects recoverable link errors from parallel workers.
///
/// Workers never fail a task for a bad symbol; they push an error here and
/// keep going so that a single link reports every duplicate definition and
/// undefined reference rather than masking all but the first. A `checkpoint`
/// at defined points in the pipeline aborts the link if anything was
/// recorded.
#[derive(Default)]
pub(crate) struct ErrorSink {
    queue: SegQueue<Error>,
}

impl ErrorSink {
    pub(crate) fn report(&self, error: Error) {
        self.queue.push(error);
    }

    pub(crate) fn checkpoint(&self) -> Result {
        let mut errors = Vec::new();
        while let Some(error) = self.queue.pop() {
            errors.push(error);
        }

        if errors.is_empty() {
            return Ok(());
        }

        // Workers race, so sort by message to keep the report deterministic.
        let mut messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        messages.sort();

        Err(Error::msg(messages.join("\n")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_passes_when_empty() {
        let sink = ErrorSink::default();
        assert!(sink.checkpoint().is_ok());
    }

    #[test]
    fn checkpoint_reports_all_errors_sorted() {
        let sink = ErrorSink::default();
        sink.report(Error::msg("zebra"));
        sink.report(Error::msg("aardvark"));
        let message = sink.checkpoint().unwrap_err().to_string();
        assert_eq!(message, "aardvark\nzebra");
        // The sink is drained by a checkpoint.
        assert!(sink.checkpoint().is_ok());
    }
}
