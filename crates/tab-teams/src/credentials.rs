use tab_core::{config::Config, errors::Error, Result};

/// How the bot authenticates to the Bot Framework.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppType {
    MultiTenant,
    SingleTenant,
    UserAssignedMsi,
}

impl AppType {
    /// Parse `BOT_TYPE`. Empty means multi-tenant (the Bot Framework default).
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_lowercase().as_str() {
            "" | "multitenant" => Ok(Self::MultiTenant),
            "singletenant" => Ok(Self::SingleTenant),
            "userassignedmsi" => Ok(Self::UserAssignedMsi),
            other => Err(Error::Config(format!(
                "BOT_TYPE must be MultiTenant, SingleTenant or UserAssignedMSI, got {other:?}"
            ))),
        }
    }
}

#[derive(Clone)]
pub struct BotCredentials {
    pub app_id: String,
    pub app_password: String,
    pub app_type: AppType,
    pub tenant_id: String,
}

impl std::fmt::Debug for BotCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotCredentials")
            .field("app_id", &self.app_id)
            .field("app_password", &"<redacted>")
            .field("app_type", &self.app_type)
            .field("tenant_id", &self.tenant_id)
            .finish()
    }
}

impl BotCredentials {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let creds = Self {
            app_id: cfg.bot_id.clone(),
            app_password: cfg.bot_password.clone(),
            app_type: AppType::parse(&cfg.bot_type)?,
            tenant_id: cfg.bot_tenant_id.clone(),
        };
        if creds.app_type == AppType::SingleTenant
            && !creds.is_anonymous()
            && creds.tenant_id.is_empty()
        {
            return Err(Error::Config(
                "BOT_TENANT_ID is required when BOT_TYPE is SingleTenant".to_string(),
            ));
        }
        Ok(creds)
    }

    /// No app id configured: talk to the connector without tokens (Bot Framework Emulator).
    pub fn is_anonymous(&self) -> bool {
        self.app_id.is_empty()
    }

    /// Tenant segment of the token endpoint.
    pub fn token_tenant(&self) -> &str {
        match self.app_type {
            AppType::SingleTenant => &self.tenant_id,
            AppType::MultiTenant | AppType::UserAssignedMsi => "botframework.com",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(pairs: &[(&str, &str)]) -> Config {
        let mut all = vec![("OPENAI_API_KEY", "k")];
        all.extend_from_slice(pairs);
        Config::from_vars(|k| {
            all.iter()
                .find(|(key, _)| *key == k)
                .map(|(_, v)| v.to_string())
        })
        .unwrap()
    }

    #[test]
    fn app_type_parsing_is_case_insensitive() {
        assert_eq!(AppType::parse("").unwrap(), AppType::MultiTenant);
        assert_eq!(AppType::parse("SingleTenant").unwrap(), AppType::SingleTenant);
        assert_eq!(
            AppType::parse("UserAssignedMSI").unwrap(),
            AppType::UserAssignedMsi
        );
        assert!(AppType::parse("other").is_err());
    }

    #[test]
    fn single_tenant_requires_tenant_id() {
        let res = BotCredentials::from_config(&cfg(&[
            ("BOT_ID", "app"),
            ("BOT_TYPE", "SingleTenant"),
        ]));
        assert!(res.is_err());

        let creds = BotCredentials::from_config(&cfg(&[
            ("BOT_ID", "app"),
            ("BOT_TYPE", "SingleTenant"),
            ("BOT_TENANT_ID", "tenant-1"),
        ]))
        .unwrap();
        assert_eq!(creds.token_tenant(), "tenant-1");
    }

    #[test]
    fn multi_tenant_uses_botframework_tenant() {
        let creds = BotCredentials::from_config(&cfg(&[("BOT_ID", "app")])).unwrap();
        assert_eq!(creds.token_tenant(), "botframework.com");
        assert!(!creds.is_anonymous());
    }

    #[test]
    fn debug_redacts_password() {
        let creds =
            BotCredentials::from_config(&cfg(&[("BOT_ID", "app"), ("BOT_PASSWORD", "s3cret")]))
                .unwrap();
        let dbg = format!("{creds:?}");
        assert!(!dbg.contains("s3cret"));
    }
}
