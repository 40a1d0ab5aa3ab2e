//! 运行监管：取消与暂停
//!
//! 每次 start 换一个新的 CancellationToken，交给所有协作者；stop 触发它。
//! 暂停是协作式的：只在外层循环顶部检查，等待通过 watch 通道而不是轮询。

use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub struct Supervisor {
    cancel_token: RwLock<CancellationToken>,
    paused: watch::Sender<bool>,
}

impl Supervisor {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            cancel_token: RwLock::new(CancellationToken::new()),
            paused,
        }
    }

    /// 为新一轮运行换一个未触发的 token
    pub async fn renew(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.cancel_token.write().await = token.clone();
        token
    }

    pub async fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.read().await.clone()
    }

    pub async fn cancel(&self) {
        self.cancel_token.read().await.cancel();
    }

    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.paused.send_replace(false);
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    /// 等到恢复（true）或被取消（false）
    pub async fn wait_resumed(&self, cancel: &CancellationToken) -> bool {
        let mut rx = self.paused.subscribe();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            r = rx.wait_for(|paused| !*paused) => r.is_ok(),
        }
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_renew_replaces_cancelled_token() {
        let sup = Supervisor::new();
        let first = sup.renew().await;
        sup.cancel().await;
        assert!(first.is_cancelled());

        let second = sup.renew().await;
        assert!(!second.is_cancelled());
        assert!(!sup.cancel_token().await.is_cancelled());
    }

    #[tokio::test]
    async fn test_wait_resumed() {
        let sup = Arc::new(Supervisor::new());
        sup.pause();
        assert!(sup.is_paused());

        let s = sup.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            s.resume();
        });
        assert!(sup.wait_resumed(&CancellationToken::new()).await);
        assert!(!sup.is_paused());
    }

    #[tokio::test]
    async fn test_wait_resumed_cancelled() {
        let sup = Supervisor::new();
        sup.pause();
        let token = CancellationToken::new();
        token.cancel();
        assert!(!sup.wait_resumed(&token).await);
    }
}
