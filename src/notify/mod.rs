pub mod client;
pub mod error;
pub mod types;

pub use client::TelegramNotifier;
pub use error::NotifyError;
pub use types::Notification;

/// Destination for job notifications.
pub trait Notifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// An absent notifier delivers nothing and never fails.
impl<N: Notifier> Notifier for Option<N> {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        match self {
            Some(inner) => inner.notify(notification).await,
            None => Ok(()),
        }
    }
}
