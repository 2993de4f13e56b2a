//! Interactive settings wizard (`focusup setup`)

use std::path::PathBuf;

use dialoguer::{Input, Password, Select};

use crate::config::file::{FocusUpConfigFile, ProfileFileConfig};
use crate::config::{DEFAULT_LANGUAGE, DEFAULT_VOICE, config_file_path, load_config_file, save_config_file};

/// Prebuilt Live API voices offered by the wizard
const VOICES: [&str; 5] = ["Kore", "Puck", "Charon", "Fenrir", "Aoede"];

/// Run the interactive settings wizard
///
/// # Errors
///
/// Returns error if user input fails or config cannot be written
pub fn run_setup() -> anyhow::Result<()> {
    println!("FocusUp Setup\n");

    let existing = load_config_file();
    let config_path =
        config_file_path().unwrap_or_else(|| PathBuf::from("~/.config/focusup/config.toml"));

    if config_path.exists() {
        println!("Existing config found at {}\n", config_path.display());
    }

    // 1. Display name
    let name: String = Input::new()
        .with_prompt("Your name (used in greetings)")
        .default(existing.profile.name.clone().unwrap_or_default())
        .allow_empty(true)
        .interact_text()?;

    // 2. API key
    let existing_key = existing.live.api_key.as_deref().filter(|k| !k.is_empty());
    let prompt = existing_key.map_or_else(
        || "Gemini API key (GEMINI_API_KEY)".to_string(),
        |k| format!("Gemini API key (current: {}, leave blank to keep)", mask_key(k)),
    );
    let key_input = Password::new()
        .with_prompt(prompt)
        .allow_empty_password(true)
        .interact()?;
    let api_key = if key_input.trim().is_empty() {
        existing_key.map(str::to_string)
    } else {
        Some(key_input.trim().to_string())
    };
    if api_key.is_none() {
        println!("No API key saved; set FOCUSUP_API_KEY before starting a session.");
    }

    // 3. Voice
    let current_voice = existing.live.voice.as_deref().unwrap_or(DEFAULT_VOICE);
    let voice_idx = Select::new()
        .with_prompt("Assistant voice")
        .items(&VOICES)
        .default(VOICES.iter().position(|v| *v == current_voice).unwrap_or(0))
        .interact()?;

    // 4. Language
    let language: String = Input::new()
        .with_prompt("Response language")
        .default(
            existing
                .profile
                .language
                .clone()
                .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
        )
        .interact_text()?;

    let config_file = apply_answers(
        existing,
        Answers {
            name,
            api_key,
            voice: VOICES[voice_idx].to_string(),
            language,
        },
    );

    save_config_file(&config_file, &config_path)?;
    println!("\nConfig written to {}", config_path.display());
    println!("Run `focusup` to start talking.");

    Ok(())
}

struct Answers {
    name: String,
    api_key: Option<String>,
    voice: String,
    language: String,
}

/// Merge wizard answers into the existing file, keeping unrelated settings
fn apply_answers(mut file: FocusUpConfigFile, answers: Answers) -> FocusUpConfigFile {
    let name = answers.name.trim();
    file.profile = ProfileFileConfig {
        name: (!name.is_empty()).then(|| name.to_string()),
        language: Some(answers.language.trim().to_string()).filter(|l| !l.is_empty()),
    };
    file.live.api_key = answers.api_key;
    file.live.voice = Some(answers.voice);
    file
}

/// Show only the edges of a key
fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() > 8 {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{head}...{tail}")
    } else {
        "****".to_string()
    }
}
