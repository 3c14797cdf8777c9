//! Credential lifecycle: acquisition, unbounded retry, refresh scheduling.

use std::{sync::Arc, time::Duration};

use tokio::sync::RwLock;
use tokio::time::{sleep, Instant};

use crate::{domain::Credential, ports::AuthPort, Result};

/// Floor for the refresh timer when the token lifetime is shorter than the poll
/// interval.
pub const MIN_REFRESH_DELAY: Duration = Duration::from_secs(1);

/// Single writer of the current [`Credential`]; everyone else reads copies.
pub struct TokenManager {
    auth: Arc<dyn AuthPort>,
    retry_delay: Duration,
    current: RwLock<Option<Credential>>,
}

impl TokenManager {
    pub fn new(auth: Arc<dyn AuthPort>, retry_delay: Duration) -> Self {
        Self {
            auth,
            retry_delay,
            current: RwLock::new(None),
        }
    }

    /// Copy of the current credential, if one was ever acquired.
    pub async fn current(&self) -> Option<Credential> {
        self.current.read().await.clone()
    }

    /// One exchange against the auth endpoint; stores the result on success.
    pub async fn refresh(&self) -> Result<Credential> {
        let cred = self.auth.refresh().await?;
        *self.current.write().await = Some(cred.clone());
        Ok(cred)
    }

    /// Refresh, retrying every `retry_delay` until it succeeds.
    ///
    /// Nothing else can make progress without a credential, so this never gives up.
    pub async fn acquire(&self) -> Credential {
        let mut attempt = 1u64;
        loop {
            match self.refresh().await {
                Ok(cred) => {
                    tracing::info!(
                        attempt,
                        expires_in_secs = cred.expires_in_secs,
                        "[AUTH] access token acquired"
                    );
                    return cred;
                }
                Err(e) => {
                    tracing::warn!(
                        attempt,
                        retry_in_secs = self.retry_delay.as_secs(),
                        "[AUTH] token refresh failed: {e}"
                    );
                    attempt += 1;
                    sleep(self.retry_delay).await;
                }
            }
        }
    }

    /// Credential timer: sleep until shortly before expiry, re-acquire, repeat.
    ///
    /// `first` is the credential acquired during startup at `acquired_at`; time
    /// already spent since then is taken off the first delay.
    pub async fn run_refresh_timer(
        &self,
        first: &Credential,
        acquired_at: Instant,
        poll_interval: Duration,
    ) {
        let mut delay = refresh_delay(first, poll_interval).saturating_sub(acquired_at.elapsed());
        loop {
            tracing::debug!(in_secs = delay.as_secs(), "[AUTH] next token refresh scheduled");
            sleep(delay).await;
            let cred = self.acquire().await;
            delay = refresh_delay(&cred, poll_interval);
        }
    }
}

/// Time from acquisition until the next refresh: lifetime minus one poll
/// interval, so the refresh lands before the last poll that could use the token.
pub fn refresh_delay(cred: &Credential, poll_interval: Duration) -> Duration {
    cred.lifetime()
        .saturating_sub(poll_interval)
        .max(MIN_REFRESH_DELAY)
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    use async_trait::async_trait;

    use super::*;
    use crate::Error;

    /// Fails `failures` times, then hands out tokens `t1`, `t2`, ...
    struct FlakyAuth {
        failures: AtomicUsize,
        issued: AtomicUsize,
        calls: Mutex<Vec<Instant>>,
        expires_in_secs: u64,
    }

    impl FlakyAuth {
        fn new(failures: usize, expires_in_secs: u64) -> Self {
            Self {
                failures: AtomicUsize::new(failures),
                issued: AtomicUsize::new(0),
                calls: Mutex::new(Vec::new()),
                expires_in_secs,
            }
        }

        fn calls(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AuthPort for FlakyAuth {
        async fn refresh(&self) -> Result<Credential> {
            self.calls.lock().unwrap().push(Instant::now());
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(Error::Auth("401 Unauthorized".to_string()));
            }
            let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Credential {
                access_token: format!("t{n}"),
                expires_in_secs: self.expires_in_secs,
            })
        }
    }

    #[test]
    fn refresh_delay_is_lifetime_minus_poll_interval() {
        let cred = Credential {
            access_token: "x".to_string(),
            expires_in_secs: 3600,
        };
        assert_eq!(
            refresh_delay(&cred, Duration::from_secs(60)),
            Duration::from_secs(3540)
        );
    }

    #[test]
    fn refresh_delay_never_reaches_zero() {
        let cred = Credential {
            access_token: "x".to_string(),
            expires_in_secs: 30,
        };
        assert_eq!(refresh_delay(&cred, Duration::from_secs(60)), MIN_REFRESH_DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_retries_at_fixed_interval_until_success() {
        let auth = Arc::new(FlakyAuth::new(3, 3600));
        let tokens = TokenManager::new(auth.clone(), Duration::from_secs(60));
        assert!(tokens.current().await.is_none());

        let start = Instant::now();
        let cred = tokens.acquire().await;

        assert_eq!(cred.access_token, "t1");
        assert_eq!(tokens.current().await, Some(cred));
        let calls = auth.calls();
        assert_eq!(calls.len(), 4);
        for (i, at) in calls.iter().enumerate() {
            assert_eq!((*at - start).as_secs(), 60 * i as u64);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_timer_rearms_from_each_new_expiry() {
        let auth = Arc::new(FlakyAuth::new(0, 600));
        let tokens = Arc::new(TokenManager::new(auth.clone(), Duration::from_secs(60)));
        let first = tokens.acquire().await;
        let start = Instant::now();

        let timer = {
            let tokens = tokens.clone();
            tokio::spawn(async move {
                tokens
                    .run_refresh_timer(&first, Instant::now(), Duration::from_secs(100))
                    .await
            })
        };

        sleep(Duration::from_secs(1001)).await;
        timer.abort();

        let calls = auth.calls();
        assert_eq!(calls.len(), 3, "startup + two timer refreshes");
        assert_eq!((calls[1] - start).as_secs(), 500);
        assert_eq!((calls[2] - start).as_secs(), 1000);
        assert_eq!(tokens.current().await.unwrap().access_token, "t3");
    }

    #[tokio::test(start_paused = true)]
    async fn failed_timer_refresh_keeps_retrying_then_rearms() {
        let auth = Arc::new(FlakyAuth::new(0, 600));
        let tokens = Arc::new(TokenManager::new(auth.clone(), Duration::from_secs(60)));
        let first = tokens.acquire().await;
        auth.failures.store(2, Ordering::SeqCst);
        let start = Instant::now();

        let timer = {
            let tokens = tokens.clone();
            tokio::spawn(async move {
                tokens
                    .run_refresh_timer(&first, Instant::now(), Duration::from_secs(100))
                    .await
            })
        };

        sleep(Duration::from_secs(1200)).await;
        timer.abort();

        let offsets: Vec<u64> = auth.calls()[1..]
            .iter()
            .map(|at| (*at - start).as_secs())
            .collect();
        assert_eq!(offsets, vec![500, 560, 620, 1120]);
    }

    #[tokio::test(start_paused = true)]
    async fn first_refresh_accounts_for_time_since_acquisition() {
        let auth = Arc::new(FlakyAuth::new(0, 600));
        let tokens = Arc::new(TokenManager::new(auth.clone(), Duration::from_secs(60)));
        let first = tokens.acquire().await;
        let acquired_at = Instant::now();
        sleep(Duration::from_secs(200)).await;

        let timer = {
            let tokens = tokens.clone();
            tokio::spawn(async move {
                tokens
                    .run_refresh_timer(&first, acquired_at, Duration::from_secs(100))
                    .await
            })
        };
        sleep(Duration::from_secs(400)).await;
        timer.abort();

        let calls = auth.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!((calls[1] - acquired_at).as_secs(), 500);
    }
}
