use std::str::FromStr;

/// Opaque credential handle for a cloud provider.
///
/// The core never inspects credentials; they are handed to the provider's
/// [`Connector`](super::Connector). `Debug` and `Display` never print secrets.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Static key pair, optionally with a session token
    AccessKey {
        key_id: String,
        secret: String,
        session_token: Option<String>,
    },
    /// Bearer / OAuth token
    Token(String),
    /// Named profile resolved by the provider SDK
    Profile(String),
    /// Whatever the environment provides (instance role, workload identity, ...)
    Ambient,
}

impl Credentials {
    pub fn new(
        kind: &CredentialKind,
        key_id: Option<String>,
        secret: Option<String>,
        token: Option<String>,
        profile: Option<String>,
    ) -> Self {
        match (kind, key_id, secret, token, profile) {
            (CredentialKind::AccessKey, Some(key_id), Some(secret), session_token, _) => {
                Self::AccessKey {
                    key_id,
                    secret,
                    session_token,
                }
            }
            (CredentialKind::Token, _, _, Some(token), _) => Self::Token(token),
            (CredentialKind::Profile, _, _, _, Some(profile)) => Self::Profile(profile),
            (CredentialKind::Ambient, _, _, _, _) | _ => Self::Ambient,
        }
    }

    /// Read `<PROVIDER>_ACCESS_KEY_ID` / `<PROVIDER>_SECRET_ACCESS_KEY`
    /// (+ `<PROVIDER>_SESSION_TOKEN`), `<PROVIDER>_TOKEN` or
    /// `<PROVIDER>_PROFILE`, falling back to ambient credentials.
    pub fn from_env(provider: &str) -> Self {
        let prefix = provider.to_uppercase().replace('-', "_");
        let var = |suffix: &str| std::env::var(format!("{}_{}", prefix, suffix)).ok();

        if let (Some(key_id), Some(secret)) = (var("ACCESS_KEY_ID"), var("SECRET_ACCESS_KEY")) {
            Self::AccessKey {
                key_id,
                secret,
                session_token: var("SESSION_TOKEN"),
            }
        } else if let Some(token) = var("TOKEN") {
            Self::Token(token)
        } else if let Some(profile) = var("PROFILE") {
            Self::Profile(profile)
        } else {
            Self::Ambient
        }
    }

    pub fn kind(&self) -> CredentialKind {
        match self {
            Self::AccessKey { .. } => CredentialKind::AccessKey,
            Self::Token(_) => CredentialKind::Token,
            Self::Profile(_) => CredentialKind::Profile,
            Self::Ambient => CredentialKind::Ambient,
        }
    }
}

impl std::fmt::Display for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AccessKey { key_id, .. } => write!(f, "AccessKey({})", key_id),
            Self::Token(_) => write!(f, "Token"),
            Self::Profile(name) => write!(f, "Profile({})", name),
            Self::Ambient => write!(f, "Ambient"),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialKind {
    AccessKey,
    Token,
    Profile,
    Ambient,
}

impl FromStr for CredentialKind {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "accesskey" | "access_key" => Ok(Self::AccessKey),
            "token" => Ok(Self::Token),
            "profile" => Ok(Self::Profile),
            "ambient" | "none" => Ok(Self::Ambient),
            _ => Err(()),
        }
    }
}
