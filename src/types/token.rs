/// Token used to signal a graceful shutdown of all runners.
///
/// This is a type alias for [`tokio_util::sync::CancellationToken`]. The
/// binary cancels it from its Ctrl+C handler; the driver loop then stops
/// every runner and waits for the workers to finish their iteration.
pub type ShutdownToken = tokio_util::sync::CancellationToken;

/// Create a new [`ShutdownToken`].
///
/// ```
/// use s3mon_rs::create_shutdown_token;
///
/// let token = create_shutdown_token();
/// assert!(!token.is_cancelled());
///
/// token.cancel();
/// assert!(token.is_cancelled());
/// ```
pub fn create_shutdown_token() -> ShutdownToken {
    tokio_util::sync::CancellationToken::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_observe_cancellation() {
        let token = create_shutdown_token();
        let clone = token.clone();
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
