use std::fmt;

use crate::error::{SessionError, SessionResult};

/// Key management mode for a supplicant network block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyManagement {
    /// Open network, no authentication
    None,
    /// WPA/WPA2 pre-shared key
    WpaPsk,
    /// WPA enterprise (EAP)
    WpaEap,
    /// Dynamic WEP / 802.1X without WPA
    Ieee8021x,
}

impl KeyManagement {
    /// The `key_mgmt` value wpa_supplicant expects.
    pub fn as_wpa(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::WpaPsk => "WPA-PSK",
            Self::WpaEap => "WPA-EAP",
            Self::Ieee8021x => "IEEE8021X",
        }
    }
}

impl fmt::Display for KeyManagement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_wpa())
    }
}

/// Connection settings handed to the supplicant when a session applies a
/// configuration.
///
/// Construct with [`SupplicantConfig::open`] or [`SupplicantConfig::wpa_psk`]
/// and adjust fields as needed; [`validate`](SupplicantConfig::validate) runs
/// before anything is sent to the backend.
#[derive(Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SupplicantConfig {
    pub ssid: String,
    /// Lock the connection to one BSSID (`XX:XX:XX:XX:XX:XX`)
    pub bssid: Option<String>,
    pub key_mgmt: KeyManagement,
    pub psk: Option<String>,
    /// Probe for the SSID actively; needed for hidden networks
    pub scan_ssid: bool,
}

impl SupplicantConfig {
    /// Settings for an open network.
    pub fn open(ssid: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            bssid: None,
            key_mgmt: KeyManagement::None,
            psk: None,
            scan_ssid: false,
        }
    }

    /// Settings for a WPA/WPA2 personal network.
    pub fn wpa_psk(ssid: impl Into<String>, psk: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            bssid: None,
            key_mgmt: KeyManagement::WpaPsk,
            psk: Some(psk.into()),
            scan_ssid: false,
        }
    }

    /// Check the settings against what the supplicant will accept.
    pub fn validate(&self) -> SessionResult<()> {
        if self.ssid.is_empty() {
            return Err(SessionError::InvalidConfig("ssid must not be empty".into()));
        }
        if self.ssid.len() > 32 {
            return Err(SessionError::InvalidConfig(format!(
                "ssid exceeds 32 bytes ({} bytes)",
                self.ssid.len()
            )));
        }
        match (&self.key_mgmt, &self.psk) {
            (KeyManagement::WpaPsk, Some(psk)) => validate_psk(psk)?,
            (KeyManagement::WpaPsk, None) => {
                return Err(SessionError::InvalidConfig(
                    "WPA-PSK requires a pre-shared key".into(),
                ));
            }
            (KeyManagement::None, Some(_)) => {
                return Err(SessionError::InvalidConfig(
                    "open networks take no pre-shared key".into(),
                ));
            }
            _ => {}
        }
        if let Some(bssid) = &self.bssid {
            validate_bssid(bssid)?;
        }
        Ok(())
    }
}

// Keep the psk out of Debug output; configs end up in logs.
impl fmt::Debug for SupplicantConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupplicantConfig")
            .field("ssid", &self.ssid)
            .field("bssid", &self.bssid)
            .field("key_mgmt", &self.key_mgmt)
            .field("psk", &self.psk.as_ref().map(|_| "<redacted>"))
            .field("scan_ssid", &self.scan_ssid)
            .finish()
    }
}

/// A passphrase is 8..=63 printable ASCII characters; a raw key is exactly
/// 64 hex digits.
fn validate_psk(psk: &str) -> SessionResult<()> {
    if psk.len() == 64 {
        if psk.chars().all(|c| c.is_ascii_hexdigit()) {
            return Ok(());
        }
        return Err(SessionError::InvalidConfig(
            "64-character psk must be hexadecimal".into(),
        ));
    }
    if psk.len() < 8 || psk.len() > 63 {
        return Err(SessionError::InvalidConfig(format!(
            "psk must be 8-63 characters or 64 hex digits ({} given)",
            psk.len()
        )));
    }
    if !psk.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err(SessionError::InvalidConfig(
            "psk must be printable ASCII".into(),
        ));
    }
    Ok(())
}

fn validate_bssid(bssid: &str) -> SessionResult<()> {
    let octets: Vec<&str> = bssid.split(':').collect();
    let well_formed = octets.len() == 6
        && octets
            .iter()
            .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()));
    if well_formed {
        Ok(())
    } else {
        Err(SessionError::InvalidConfig(format!(
            "malformed bssid: {bssid}"
        )))
    }
}
