use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MeditationLength {
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "10m")]
    TenMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "30m")]
    ThirtyMinutes,
    #[serde(rename = "45m")]
    FortyFiveMinutes,
}

impl MeditationLength {
    pub fn minutes(&self) -> u32 {
        match self {
            MeditationLength::FiveMinutes => 5,
            MeditationLength::TenMinutes => 10,
            MeditationLength::FifteenMinutes => 15,
            MeditationLength::ThirtyMinutes => 30,
            MeditationLength::FortyFiveMinutes => 45,
        }
    }
}

impl fmt::Display for MeditationLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}m", self.minutes())
    }
}

impl FromStr for MeditationLength {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().trim_end_matches('m') {
            "5" => Ok(MeditationLength::FiveMinutes),
            "10" => Ok(MeditationLength::TenMinutes),
            "15" => Ok(MeditationLength::FifteenMinutes),
            "30" => Ok(MeditationLength::ThirtyMinutes),
            "45" => Ok(MeditationLength::FortyFiveMinutes),
            _ => Err(format!(
                "Invalid length '{}'. Valid options: 5m, 10m, 15m, 30m, 45m",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meditation {
    pub id: String,
    pub title: String,
    pub description: String,
    pub category: String,
    pub length: MeditationLength,
    pub audio_url: String,
    pub image_url: String,
    #[serde(default)]
    pub featured: bool,
    pub created_at: NaiveDate,
}

impl Meditation {
    /// Case-insensitive match on title or description.
    pub fn matches(&self, query: &str) -> bool {
        let query = query.to_lowercase();
        self.title.to_lowercase().contains(&query)
            || self.description.to_lowercase().contains(&query)
    }
}

impl fmt::Display for Meditation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.title)?;
        writeln!(f, "{}", "=".repeat(self.title.len()))?;
        writeln!(f, "ID: {}", self.id)?;
        writeln!(f, "Category: {}", self.category)?;
        writeln!(f, "Length: {}", self.length)?;
        if self.featured {
            writeln!(f, "Featured")?;
        }
        writeln!(f, "Added: {}", self.created_at)?;
        writeln!(f, "\n{}", self.description)?;
        write!(f, "\nAudio: {}", self.audio_url)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub description: String,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meditation() -> Meditation {
        Meditation {
            id: "1".to_string(),
            title: "Finding Calm".to_string(),
            description: "A meditation to help you find your inner peace.".to_string(),
            category: "breathing".to_string(),
            length: MeditationLength::FiveMinutes,
            audio_url: "https://example.com/calm.mp3".to_string(),
            image_url: "https://example.com/calm.jpeg".to_string(),
            featured: false,
            created_at: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
        }
    }

    #[test]
    fn test_length_display() {
        assert_eq!(MeditationLength::FiveMinutes.to_string(), "5m");
        assert_eq!(MeditationLength::FortyFiveMinutes.to_string(), "45m");
    }

    #[test]
    fn test_length_from_str() {
        assert_eq!(
            MeditationLength::from_str("10m").unwrap(),
            MeditationLength::TenMinutes
        );
        assert_eq!(
            MeditationLength::from_str("30").unwrap(),
            MeditationLength::ThirtyMinutes
        );
        assert!(MeditationLength::from_str("20m").is_err());
        assert!(MeditationLength::from_str("").is_err());
    }

    #[test]
    fn test_length_json() {
        let json = serde_json::to_string(&MeditationLength::FifteenMinutes).unwrap();
        assert_eq!(json, "\"15m\"");
    }

    #[test]
    fn test_meditation_json_shape() {
        let value = serde_json::to_value(meditation()).unwrap();
        assert_eq!(value["audioUrl"], "https://example.com/calm.mp3");
        assert_eq!(value["createdAt"], "2024-05-01");
        assert_eq!(value["length"], "5m");
    }

    #[test]
    fn test_matches_is_case_insensitive() {
        let meditation = meditation();
        assert!(meditation.matches("calm"));
        assert!(meditation.matches("INNER PEACE"));
        assert!(!meditation.matches("sleep"));
    }
}
