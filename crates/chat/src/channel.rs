/// Marketing channel a generated message targets.
///
/// Unknown names from the server are kept verbatim so callers can decide
/// whether to skip or surface them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Channel {
    Email,
    Sms,
    WhatsApp,
    Ads,
    Unknown(String),
}

impl Channel {
    pub const KNOWN: [Channel; 4] = [Self::Email, Self::Sms, Self::WhatsApp, Self::Ads];

    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "email" => Self::Email,
            "sms" => Self::Sms,
            "whatsapp" => Self::WhatsApp,
            "ads" => Self::Ads,
            _ => Self::Unknown(raw.to_string()),
        }
    }

    /// Wire key, as used in channel-message download paths.
    pub fn key(&self) -> &str {
        match self {
            Self::Email => "email",
            Self::Sms => "sms",
            Self::WhatsApp => "whatsapp",
            Self::Ads => "ads",
            Self::Unknown(raw) => raw,
        }
    }

    pub fn display_name(&self) -> Option<&'static str> {
        match self {
            Self::Email => Some("Email"),
            Self::Sms => Some("SMS"),
            Self::WhatsApp => Some("WhatsApp"),
            Self::Ads => Some("Ads"),
            Self::Unknown(_) => None,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}
