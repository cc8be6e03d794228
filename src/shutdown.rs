//! Ctrl-C wiring for the collection loop.

use tokio_util::sync::CancellationToken;

/// Arm a cancellation token on the process interrupt signal.
///
/// The collector observes the token at the top of each cycle and while
/// sleeping between cycles, so a signal raised at either point stops the
/// loop before the next request goes out.
pub fn install() -> CancellationToken {
    let token = CancellationToken::new();
    let armed = token.clone();

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Interrupt received, stopping collection");
                armed.cancel();
            }
            Err(err) => {
                tracing::warn!(error = %err, "Could not listen for the interrupt signal");
            }
        }
    });

    token
}
