//! Configuration for the session orchestrator.
//!
//! [`SessionConfig`] carries token lifetimes, key rotation and retention
//! periods, the sweep cadence, and the storage timeout. It can be built in
//! code through a validating builder or deserialized from any serde format,
//! with durations written in humantime form (`"15m"`, `"26h"`).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SessionError};

/// Default token issuer.
pub const DEFAULT_ISSUER: &str = "tokenward";

/// Default access token lifetime (15 minutes).
pub const DEFAULT_ACCESS_TOKEN_TTL: Duration = Duration::from_secs(15 * 60);

/// Default refresh token lifetime (24 hours).
pub const DEFAULT_REFRESH_TOKEN_TTL: Duration = Duration::from_secs(24 * 3600);

/// Default recovery token lifetime (15 minutes).
pub const DEFAULT_RECOVERY_TOKEN_TTL: Duration = Duration::from_secs(15 * 60);

/// Default signing key rotation interval (2 hours).
pub const DEFAULT_ROTATION_INTERVAL: Duration = Duration::from_secs(2 * 3600);

/// Default retention of superseded signing keys (26 hours).
pub const DEFAULT_KEY_RETENTION: Duration = Duration::from_secs(26 * 3600);

/// Default interval between expired-session sweeps (5 minutes).
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Default bound on refresh-path storage calls (5 seconds).
pub const DEFAULT_STORAGE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of per-user lock stripes.
pub const DEFAULT_LOCK_STRIPES: usize = 64;

fn default_issuer() -> String {
    DEFAULT_ISSUER.to_owned()
}

fn default_access_token_ttl() -> Duration {
    DEFAULT_ACCESS_TOKEN_TTL
}

fn default_refresh_token_ttl() -> Duration {
    DEFAULT_REFRESH_TOKEN_TTL
}

fn default_recovery_token_ttl() -> Duration {
    DEFAULT_RECOVERY_TOKEN_TTL
}

fn default_rotation_interval() -> Duration {
    DEFAULT_ROTATION_INTERVAL
}

fn default_key_retention() -> Duration {
    DEFAULT_KEY_RETENTION
}

fn default_sweep_interval() -> Duration {
    DEFAULT_SWEEP_INTERVAL
}

fn default_storage_timeout() -> Duration {
    DEFAULT_STORAGE_TIMEOUT
}

fn default_lock_stripes() -> usize {
    DEFAULT_LOCK_STRIPES
}

/// Configuration for [`SessionOrchestrator`](crate::SessionOrchestrator).
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use tokenward_session::SessionConfig;
///
/// let config = SessionConfig::builder()
///     .issuer("auth.example.com")
///     .access_token_ttl(Duration::from_secs(300))
///     .build()?;
///
/// assert_eq!(config.issuer(), "auth.example.com");
/// assert_eq!(config.session_ttl(), config.refresh_token_ttl());
/// # Ok::<(), tokenward_session::SessionError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// Issuer written into and required of every token.
    #[serde(default = "default_issuer")]
    pub(crate) issuer: String,

    /// Lifetime of LOGIN (access) tokens.
    #[serde(with = "humantime_serde", default = "default_access_token_ttl")]
    pub(crate) access_token_ttl: Duration,

    /// Lifetime of REFRESH tokens.
    #[serde(with = "humantime_serde", default = "default_refresh_token_ttl")]
    pub(crate) refresh_token_ttl: Duration,

    /// Lifetime of RECOVER tokens.
    #[serde(with = "humantime_serde", default = "default_recovery_token_ttl")]
    pub(crate) recovery_token_ttl: Duration,

    /// Age after which the sweep retires an active record. Defaults to the
    /// refresh token lifetime.
    #[serde(with = "humantime_serde::option", default, skip_serializing_if = "Option::is_none")]
    pub(crate) session_ttl: Option<Duration>,

    /// Period of the background key rotation.
    #[serde(with = "humantime_serde", default = "default_rotation_interval")]
    pub(crate) rotation_interval: Duration,

    /// How long a superseded key stays resolvable.
    #[serde(with = "humantime_serde", default = "default_key_retention")]
    pub(crate) key_retention: Duration,

    /// Period of the background expired-session sweep.
    #[serde(with = "humantime_serde", default = "default_sweep_interval")]
    pub(crate) sweep_interval: Duration,

    /// Bound on each refresh-path storage call.
    #[serde(with = "humantime_serde", default = "default_storage_timeout")]
    pub(crate) storage_timeout: Duration,

    /// Number of per-user lock stripes.
    #[serde(default = "default_lock_stripes")]
    pub(crate) lock_stripes: usize,
}

#[bon::bon]
impl SessionConfig {
    /// Creates a validated configuration.
    ///
    /// Every field is optional; unset fields take the `DEFAULT_*` values.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Config`] if:
    /// - the issuer is empty
    /// - any duration is zero
    /// - `key_retention` is shorter than the longest token lifetime
    /// - `session_ttl` is shorter than `access_token_ttl`
    /// - `lock_stripes` is zero
    #[builder]
    pub fn new(
        #[builder(into, default = default_issuer())] issuer: String,
        #[builder(default = DEFAULT_ACCESS_TOKEN_TTL)] access_token_ttl: Duration,
        #[builder(default = DEFAULT_REFRESH_TOKEN_TTL)] refresh_token_ttl: Duration,
        #[builder(default = DEFAULT_RECOVERY_TOKEN_TTL)] recovery_token_ttl: Duration,
        session_ttl: Option<Duration>,
        #[builder(default = DEFAULT_ROTATION_INTERVAL)] rotation_interval: Duration,
        #[builder(default = DEFAULT_KEY_RETENTION)] key_retention: Duration,
        #[builder(default = DEFAULT_SWEEP_INTERVAL)] sweep_interval: Duration,
        #[builder(default = DEFAULT_STORAGE_TIMEOUT)] storage_timeout: Duration,
        #[builder(default = DEFAULT_LOCK_STRIPES)] lock_stripes: usize,
    ) -> Result<Self> {
        let config = Self {
            issuer,
            access_token_ttl,
            refresh_token_ttl,
            recovery_token_ttl,
            session_ttl,
            rotation_interval,
            key_retention,
            sweep_interval,
            storage_timeout,
            lock_stripes,
        };
        config.validate()?;
        Ok(config)
    }
}

impl SessionConfig {
    /// Checks the cross-field constraints.
    ///
    /// Deserialized configurations bypass the builder, so call this after
    /// loading one.
    ///
    /// # Errors
    ///
    /// See [`SessionConfig::builder`].
    pub fn validate(&self) -> Result<()> {
        if self.issuer.is_empty() {
            return Err(SessionError::config("issuer cannot be empty"));
        }

        let durations = [
            ("access_token_ttl", self.access_token_ttl),
            ("refresh_token_ttl", self.refresh_token_ttl),
            ("recovery_token_ttl", self.recovery_token_ttl),
            ("session_ttl", self.session_ttl()),
            ("rotation_interval", self.rotation_interval),
            ("key_retention", self.key_retention),
            ("sweep_interval", self.sweep_interval),
            ("storage_timeout", self.storage_timeout),
        ];
        if let Some((name, _)) = durations.iter().find(|(_, d)| d.is_zero()) {
            return Err(SessionError::config(format!("{name} must be greater than zero")));
        }

        let longest_token = self.max_token_ttl();
        if self.key_retention < longest_token {
            return Err(SessionError::config(format!(
                "key_retention ({:?}) must be at least the longest token lifetime ({:?})",
                self.key_retention, longest_token
            )));
        }

        if self.session_ttl() < self.access_token_ttl {
            return Err(SessionError::config(format!(
                "session_ttl ({:?}) must be at least access_token_ttl ({:?})",
                self.session_ttl(),
                self.access_token_ttl
            )));
        }

        if self.lock_stripes == 0 {
            return Err(SessionError::config("lock_stripes must be greater than zero"));
        }

        Ok(())
    }

    /// Returns the token issuer.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Returns the access token lifetime.
    #[must_use]
    pub fn access_token_ttl(&self) -> Duration {
        self.access_token_ttl
    }

    /// Returns the refresh token lifetime.
    #[must_use]
    pub fn refresh_token_ttl(&self) -> Duration {
        self.refresh_token_ttl
    }

    /// Returns the recovery token lifetime.
    #[must_use]
    pub fn recovery_token_ttl(&self) -> Duration {
        self.recovery_token_ttl
    }

    /// Returns the sweep age, falling back to the refresh token lifetime.
    #[must_use]
    pub fn session_ttl(&self) -> Duration {
        self.session_ttl.unwrap_or(self.refresh_token_ttl)
    }

    /// Returns the key rotation interval.
    #[must_use]
    pub fn rotation_interval(&self) -> Duration {
        self.rotation_interval
    }

    /// Returns the superseded key retention.
    #[must_use]
    pub fn key_retention(&self) -> Duration {
        self.key_retention
    }

    /// Returns the sweep interval.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }

    /// Returns the storage call timeout.
    #[must_use]
    pub fn storage_timeout(&self) -> Duration {
        self.storage_timeout
    }

    /// Returns the number of lock stripes.
    #[must_use]
    pub fn lock_stripes(&self) -> usize {
        self.lock_stripes
    }

    /// Longest lifetime of any token this service issues.
    #[must_use]
    pub fn max_token_ttl(&self) -> Duration {
        self.access_token_ttl.max(self.refresh_token_ttl).max(self.recovery_token_ttl)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            issuer: default_issuer(),
            access_token_ttl: DEFAULT_ACCESS_TOKEN_TTL,
            refresh_token_ttl: DEFAULT_REFRESH_TOKEN_TTL,
            recovery_token_ttl: DEFAULT_RECOVERY_TOKEN_TTL,
            session_ttl: None,
            rotation_interval: DEFAULT_ROTATION_INTERVAL,
            key_retention: DEFAULT_KEY_RETENTION,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            storage_timeout: DEFAULT_STORAGE_TIMEOUT,
            lock_stripes: DEFAULT_LOCK_STRIPES,
        }
    }
}
