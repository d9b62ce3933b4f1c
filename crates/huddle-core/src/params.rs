use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::errors::HuddleError;
use crate::settings::Settings;

const MEETING_NUMBER: &str = r"^\d{9,11}$";
const VANITY_NAME: &str = r"^[A-Za-z0-9][A-Za-z0-9._-]{4,39}$";

fn is_match(pattern: &str, candidate: &str) -> Result<bool, HuddleError> {
    let re = Regex::new(pattern).map_err(|e| HuddleError::Config(e.to_string()))?;
    Ok(re.is_match(candidate))
}

fn check_display_name(name: &str) -> Result<(), HuddleError> {
    if name.trim().is_empty() {
        return Err(HuddleError::InvalidParams("display name is empty".into()));
    }
    Ok(())
}

fn check_meeting_number(number: &str) -> Result<(), HuddleError> {
    if is_match(MEETING_NUMBER, number)? {
        Ok(())
    } else {
        Err(HuddleError::InvalidParams(format!(
            "invalid meeting number: '{number}'"
        )))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinParams {
    pub meeting_number: Option<String>,
    /// Personal link name, used instead of a number.
    pub vanity_id: Option<String>,
    pub display_name: String,
    pub password: Option<String>,
    pub webinar_token: Option<String>,
    pub no_audio: bool,
    pub no_video: bool,
}

impl JoinParams {
    pub fn new(meeting_number: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            meeting_number: Some(meeting_number.into()),
            display_name: display_name.into(),
            ..Self::default()
        }
    }

    /// Accepts `https://host/j/<number>?pwd=<password>`, `/w/<number>` webinar
    /// links, `/my/<name>` personal links (scheme optional), or a bare number.
    pub fn from_link(link: &str, display_name: impl Into<String>) -> Result<Self, HuddleError> {
        let link = link.trim();
        let mut params = Self {
            display_name: display_name.into(),
            ..Self::default()
        };

        let digits: String = link.chars().filter(|c| !matches!(*c, ' ' | '-')).collect();
        if !link.contains('/') {
            check_meeting_number(&digits)?;
            params.meeting_number = Some(digits);
            return Ok(params);
        }

        let with_scheme = if link.contains("://") {
            link.to_string()
        } else {
            format!("https://{link}")
        };
        let url = Url::parse(&with_scheme)
            .map_err(|e| HuddleError::InvalidParams(format!("invalid join link: {e}")))?;

        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();
        match segments.as_slice() {
            ["j" | "w", number] => {
                check_meeting_number(number)?;
                params.meeting_number = Some((*number).to_string());
            }
            ["my", name] => {
                if !is_match(VANITY_NAME, name)? {
                    return Err(HuddleError::InvalidParams(format!(
                        "invalid personal link name: '{name}'"
                    )));
                }
                params.vanity_id = Some((*name).to_string());
            }
            _ => {
                return Err(HuddleError::InvalidParams(format!(
                    "unrecognized join link path: '{}'",
                    url.path()
                )));
            }
        }

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "pwd" => params.password = Some(value.into_owned()),
                "tk" => params.webinar_token = Some(value.into_owned()),
                _ => {}
            }
        }
        Ok(params)
    }

    /// Fill gaps from stored preferences.
    pub fn with_settings(mut self, settings: &Settings) -> Self {
        if self.display_name.trim().is_empty() {
            if let Some(name) = &settings.display_name {
                self.display_name = name.clone();
            }
        }
        self.no_audio = self.no_audio || !settings.audio_on_join;
        self.no_video = self.no_video || !settings.video_on_join;
        self
    }

    pub fn validate(&self) -> Result<(), HuddleError> {
        check_display_name(&self.display_name)?;
        match (&self.meeting_number, &self.vanity_id) {
            (Some(number), None) => check_meeting_number(number),
            (None, Some(_)) => Ok(()),
            (Some(_), Some(_)) => Err(HuddleError::InvalidParams(
                "give a meeting number or a personal link, not both".into(),
            )),
            (None, None) => Err(HuddleError::InvalidParams(
                "meeting number or personal link required".into(),
            )),
        }
    }
}

/// Parameters for starting a meeting as its host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartParams {
    /// `None` starts an instant meeting.
    pub meeting_number: Option<String>,
    pub display_name: String,
    /// Host authorization token.
    pub host_token: String,
    pub no_audio: bool,
    pub no_video: bool,
}

impl StartParams {
    pub fn instant(display_name: impl Into<String>, host_token: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            host_token: host_token.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), HuddleError> {
        check_display_name(&self.display_name)?;
        if self.host_token.trim().is_empty() {
            return Err(HuddleError::InvalidParams("host token is empty".into()));
        }
        if let Some(number) = &self.meeting_number {
            check_meeting_number(number)?;
        }
        Ok(())
    }
}
