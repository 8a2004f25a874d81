//! Notification seam.
//!
//! The apply engine announces applied documents through this trait.
//! Delivery is best-effort: a failed notification is logged by the
//! caller and never fails the apply.

/// Delivers a message to one recipient. Returns false on failure.
pub trait Notifier: Send + Sync {
    fn notify(&self, recipient: &str, message: &str) -> bool;
}

/// Notifier that writes to the log. Default when no transport is wired.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, recipient: &str, message: &str) -> bool {
        log::info!("Notification for {}: {}", recipient, message);
        true
    }
}
