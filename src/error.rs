use std::{fmt::{Debug, Display}, str::FromStr};

pub struct TrackError(pub(crate) String);

impl TrackError {
    pub(crate) fn new<T: Display>(details: T) -> Self {
        TrackError(details.to_string())
    }
}

impl FromStr for TrackError {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(TrackError(s.to_string()))
    }
}

impl Display for TrackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.as_str())
    }
}

impl Debug for TrackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TrackError {{ String({}) }}", &self.0)
    }
}

impl From<std::io::Error> for TrackError {
    fn from(e: std::io::Error) -> Self {
        TrackError(e.to_string())
    }
}

impl From<serde_yaml::Error> for TrackError {
    fn from(e: serde_yaml::Error) -> Self {
        TrackError(e.to_string())
    }
}

impl From<serde_json::Error> for TrackError {
    fn from(e: serde_json::Error) -> Self {
        TrackError(e.to_string())
    }
}

impl From<regex::Error> for TrackError {
    fn from(e: regex::Error) -> Self {
        TrackError(e.to_string())
    }
}
