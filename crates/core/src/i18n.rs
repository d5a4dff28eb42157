//! Localized user-facing messages.
//!
//! Two locales ship with the gateway: Chinese (the default) and English.
//! Every message a client can see goes through [`Locale::text`].

use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    Zh,
    En,
}

impl FromStr for Locale {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "zh" => Ok(Self::Zh),
            "en" => Ok(Self::En),
            other => Err(format!("unsupported locale '{other}' (expected zh or en)")),
        }
    }
}

/// Message catalogue keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKey {
    UnknownModel,
    MissingAppId,
    AccountLocked,
    AccountLimited,
    NetworkError,
    VerificationRequired,
    RegistrationFailed,
    ErrorOther,
    SessionGenerated,
    SessionGenerateFailed,
    RefusalDetected,
    HumanMarker,
    SystemMarker,
}

impl Locale {
    pub fn text(&self, key: MessageKey) -> &'static str {
        use MessageKey::*;
        match self {
            Locale::Zh => match key {
                UnknownModel => "未知的模型",
                MissingAppId => "请在请求头中提供appId",
                AccountLocked => "账号已被锁定（只读模式），已清理缓存凭证，请重试",
                AccountLimited => "账号已达到使用上限，已清理缓存凭证，请稍后重试",
                NetworkError => "网络连接失败，请检查代理设置",
                VerificationRequired => "账号需要完成短信验证，已清理缓存凭证，请重试",
                RegistrationFailed => "自动注册账号失败，请稍后重试",
                ErrorOther => "请稍后重试，或检查凭证与网络是否可用",
                SessionGenerated => "已生成会话凭证",
                SessionGenerateFailed => "生成会话凭证失败",
                RefusalDetected => "检测到拒绝回复标记，已清理缓存凭证",
                HumanMarker => "检测到 H: 标记，结束输出",
                SystemMarker => "检测到 System: 标记，结束输出",
            },
            Locale::En => match key {
                UnknownModel => "Unknown model",
                MissingAppId => "Please provide the appId in the request header",
                AccountLocked => {
                    "The account is locked (read-only mode); the cached credential was cleared, please retry"
                }
                AccountLimited => {
                    "The account hit its usage limit; the cached credential was cleared, please retry later"
                }
                NetworkError => "Network connection failed, please check the proxy settings",
                VerificationRequired => {
                    "The account requires SMS verification; the cached credential was cleared, please retry"
                }
                RegistrationFailed => "Automatic account registration failed, please retry later",
                ErrorOther => "Please retry later, or check that the credential and network are usable",
                SessionGenerated => "Session credential generated",
                SessionGenerateFailed => "Failed to generate a session credential",
                RefusalDetected => "Refusal marker detected; the cached credential was cleared",
                HumanMarker => "H: marker detected, output stopped",
                SystemMarker => "System: marker detected, output stopped",
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locale_parsing() {
        assert_eq!("zh".parse::<Locale>().unwrap(), Locale::Zh);
        assert_eq!("EN".parse::<Locale>().unwrap(), Locale::En);
        assert!("fr".parse::<Locale>().is_err());
        assert_eq!(Locale::default(), Locale::Zh);
    }

    #[test]
    fn every_key_has_text_in_both_locales() {
        use MessageKey::*;
        let keys = [
            UnknownModel,
            MissingAppId,
            AccountLocked,
            AccountLimited,
            NetworkError,
            VerificationRequired,
            RegistrationFailed,
            ErrorOther,
            SessionGenerated,
            SessionGenerateFailed,
            RefusalDetected,
            HumanMarker,
            SystemMarker,
        ];
        for key in keys {
            assert!(!Locale::Zh.text(key).is_empty());
            assert!(!Locale::En.text(key).is_empty());
        }
    }
}
