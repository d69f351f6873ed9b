//! Character (persona) definitions
//!
//! Characters decide the system prompt injected in front of a conversation.
//! A few are built in; more can be loaded from TOML files.
//!
//! # Example Character File
//!
//! ```toml
//! [character]
//! name = "Storyteller"
//! description = "Narrates everything as a tall tale"
//!
//! [system_prompt]
//! content = """
//! You are a storyteller...
//! """
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::fs;

/// A character template as written on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterTemplate {
    pub character: CharacterInfo,

    pub system_prompt: SystemPrompt,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterInfo {
    /// Display name
    pub name: String,

    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemPrompt {
    pub content: String,
}

/// A resolved character, keyed by its lookup id
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Character {
    /// Lookup id (lowercase file stem or built-in id)
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(skip)]
    pub system_prompt: String,
}

impl Character {
    fn from_template(id: String, template: CharacterTemplate) -> Self {
        Self {
            id,
            name: template.character.name,
            description: template.character.description,
            system_prompt: template.system_prompt.content,
        }
    }
}

/// All characters known to the bot
#[derive(Debug, Clone)]
pub struct CharacterBook {
    characters: BTreeMap<String, Character>,
}

impl CharacterBook {
    /// Only the built-in characters
    pub fn builtin() -> Self {
        let characters = builtin::ALL
            .iter()
            .map(|(id, name, description, prompt)| {
                (
                    id.to_string(),
                    Character {
                        id: id.to_string(),
                        name: name.to_string(),
                        description: description.to_string(),
                        system_prompt: prompt.to_string(),
                    },
                )
            })
            .collect();

        Self { characters }
    }

    /// Built-ins plus every `*.toml` file in `dir`. Files override built-ins
    /// with the same id.
    pub async fn load_dir(dir: &Path) -> Result<Self, CharacterError> {
        let mut book = Self::builtin();

        let mut entries = fs::read_dir(dir)
            .await
            .map_err(|e| CharacterError::IoError(e.to_string()))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CharacterError::IoError(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().map_or(false, |ext| ext == "toml") {
                let Some(stem) = path.file_stem() else {
                    continue;
                };
                let id = stem.to_string_lossy().to_lowercase();
                let template = Self::load_from_file(&path).await?;
                tracing::debug!(id = %id, path = %path.display(), "Loaded character");
                book.insert(Character::from_template(id, template));
            }
        }

        Ok(book)
    }

    /// Load a template directly from a file path
    pub async fn load_from_file(path: &Path) -> Result<CharacterTemplate, CharacterError> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| CharacterError::IoError(e.to_string()))?;

        toml::from_str(&content).map_err(|e| CharacterError::ParseError(e.to_string()))
    }

    pub fn insert(&mut self, character: Character) {
        self.characters.insert(character.id.clone(), character);
    }

    /// Case-insensitive lookup by id
    pub fn get(&self, id: &str) -> Option<&Character> {
        self.characters.get(&id.to_lowercase())
    }

    pub fn resolve(&self, id: &str) -> Result<&Character, CharacterError> {
        self.get(id)
            .ok_or_else(|| CharacterError::NotFound(id.to_string()))
    }

    pub fn list(&self) -> Vec<&Character> {
        self.characters.values().collect()
    }
}

/// Errors from character loading
#[derive(Debug, thiserror::Error)]
pub enum CharacterError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Character not found: {0}")]
    NotFound(String),
}

/// Built-in characters that don't require files
pub mod builtin {
    /// Id of the character used when nothing else is selected
    pub const DEFAULT_ID: &str = "default";

    /// Default general-purpose assistant prompt
    pub const DEFAULT: &str = "You are Tally, a friendly assistant living in a chat server. Keep answers short enough to read in a chat window, and use Markdown sparingly.";

    pub const CONCISE: &str = "You are Tally in concise mode. Answer in at most three sentences. Skip greetings and filler.";

    pub const STORYTELLER: &str = r#"You are Tally the storyteller. Answer every question, but wrap the answer in a short, vivid tale.

Rules:
1. Keep the facts correct even when the framing is playful
2. Stay under 200 words
3. End with a one-line moral"#;

    /// (id, name, description, system prompt)
    pub const ALL: &[(&str, &str, &str, &str)] = &[
        (DEFAULT_ID, "Tally", "Friendly general-purpose assistant", DEFAULT),
        ("concise", "Tally (concise)", "Short, direct answers", CONCISE),
        ("storyteller", "Storyteller", "Answers as a tall tale", STORYTELLER),
    ];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_template() {
        let toml_content = r#"
[character]
name = "Test Character"
description = "A test character"

[system_prompt]
content = "You are a test assistant."
"#;

        let template: CharacterTemplate = toml::from_str(toml_content).unwrap();
        assert_eq!(template.character.name, "Test Character");
        assert_eq!(template.system_prompt.content, "You are a test assistant.");
    }

    #[test]
    fn test_builtin_lookup_is_case_insensitive() {
        let book = CharacterBook::builtin();
        assert_eq!(book.list().len(), builtin::ALL.len());
        assert_eq!(book.get("Storyteller").unwrap().id, "storyteller");
        assert!(matches!(book.resolve("nobody"), Err(CharacterError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_load_dir_overrides_builtin() {
        let dir = std::env::temp_dir().join(format!("tally-characters-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("Concise.toml"),
            "[character]\nname = \"Terse\"\n\n[system_prompt]\ncontent = \"One word answers.\"\n",
        )
        .unwrap();
        std::fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let book = CharacterBook::load_dir(&dir).await.unwrap();
        let concise = book.get("concise").unwrap();
        assert_eq!(concise.name, "Terse");
        assert_eq!(concise.system_prompt, "One word answers.");
        assert_eq!(book.list().len(), builtin::ALL.len());

        std::fs::remove_dir_all(&dir).ok();
    }
}
