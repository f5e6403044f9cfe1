use thiserror::Error;
use tokio::sync::mpsc;

/// Ошибка регистрации: превышен лимит на число регистраций.
///
/// Поднимается синхронно в момент регистрации слушателя или подписки,
/// до какого-либо изменения состояния. Восстановима: вызывающий код может
/// поднять лимит либо снять часть существующих регистраций и повторить.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("listener limit exceeded (at most {limit} registrations per event)")]
pub struct LimitExceeded {
    /// Настроенный лимит, который был бы превышен.
    pub limit: usize,
}

/// Ошибка при неблокирующем получении события из подписки.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TryRecvError {
    #[error("no events available")]
    Empty,

    #[error("subscription is closed")]
    Closed,
}

impl From<mpsc::error::TryRecvError> for TryRecvError {
    fn from(err: mpsc::error::TryRecvError) -> Self {
        match err {
            mpsc::error::TryRecvError::Empty => TryRecvError::Empty,
            mpsc::error::TryRecvError::Disconnected => TryRecvError::Closed,
        }
    }
}
