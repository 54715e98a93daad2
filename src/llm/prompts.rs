//! Prompt assembly and sampling parameters per mode and model family.

use crate::config::{
    LLM_CHANNEL_MAX_TOKENS, LLM_CHANNEL_TEMPERATURE, LLM_MAX_TOKENS, LLM_TEMPERATURE, LLM_TOP_P,
};
use crate::session::Mode;

#[derive(Debug, Clone, Copy)]
pub struct SamplingParams {
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
}

/// Channel-tagged model families emit analysis/final blocks and need
/// conservative sampling to avoid repetition loops.
pub fn is_channel_tagged(model_id: &str) -> bool {
    model_id.to_lowercase().contains("gpt-oss")
}

pub fn sampling_for(model_id: &str) -> SamplingParams {
    if is_channel_tagged(model_id) {
        SamplingParams {
            temperature: LLM_CHANNEL_TEMPERATURE,
            top_p: LLM_TOP_P,
            max_tokens: LLM_CHANNEL_MAX_TOKENS,
        }
    } else {
        SamplingParams {
            temperature: LLM_TEMPERATURE,
            top_p: LLM_TOP_P,
            max_tokens: LLM_MAX_TOKENS,
        }
    }
}

pub struct PromptBundle {
    pub system: String,
    pub user: String,
}

/// Assemble the system and user prompts for a shaping job.
///
/// `template` is the user-configured instruction block for the mode. Output
/// formatting rules differ by model family: channel-tagged models are told to
/// use the analysis/final channels and never `<think>` tags; other models get
/// the two-part think-then-bullets structure for proofread mode.
pub fn build_prompt(mode: Mode, model_id: &str, template: &str, input: &str) -> PromptBundle {
    let channel = is_channel_tagged(model_id);

    let system = if channel {
        "You are a meticulous medical proof-reader. Use the analysis channel for brief \
         reasoning (at most 2 short sentences, 50 words). Use the final channel for the \
         corrected text only. Do not include <think> tags anywhere."
            .to_string()
    } else {
        "You are a meticulous medical proof-reader.".to_string()
    };

    let format_rules = match (mode, channel) {
        (Mode::Proofread, true) => {
            "Use the analysis channel for brief reasoning and the final channel for the \
             corrected text.\n\
             - In the analysis channel: keep reasoning to at most 2 short sentences.\n\
             - In the final channel: provide ONLY the corrected text as a bulleted list \
             using '-' markers.\n\
             - Do not include any <think> tags or meta commentary anywhere.\n\
             - Ensure there is NO text after the final bullet point.\n"
                .to_string()
        }
        (Mode::Proofread, false) => {
            "Your response MUST have two parts.\n\
             PART 1: your thought process, enclosed entirely within <think> and </think> \
             tags (use exactly these English tags).\n\
             PART 2: immediately after the closing </think> tag, ONLY the corrected \
             version of the input text, formatted as a bulleted list with '-' markers, \
             one corrected sentence or coherent segment per bullet.\n\
             Do not add conversational filler, explanations, or apologies anywhere in \
             part 2, and ensure there is NO text after the final bullet point.\n"
                .to_string()
        }
        (Mode::Letter, _) => {
            "Generate a short professional letter based on the input text, with a tone \
             appropriate to the context it implies.\n\
             Format the letter with clear paragraphs. Do not add any conversational \
             filler before or after the letter content itself.\n"
                .to_string()
        }
        (Mode::Dictate, _) => String::new(),
    };

    let task = match mode {
        Mode::Proofread => "Proofread",
        Mode::Letter => "Letter",
        Mode::Dictate => "Output",
    };

    let user = format!(
        "{template}\n\n\
         IMPORTANT: you MUST strictly follow these output formatting instructions for \
         your entire response:\n{format_rules}\n\
         -----\n\
         Input Text to {task}:\n{input}\n\n\
         Now, generate the {task} output, adhering to all instructions above:\n"
    );

    PromptBundle { system, user }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpt_oss_models_are_channel_tagged() {
        assert!(is_channel_tagged("gpt-oss:20b"));
        assert!(is_channel_tagged("GPT-OSS-120b"));
        assert!(!is_channel_tagged("qwen3:8b"));
    }

    #[test]
    fn channel_models_get_tighter_sampling() {
        let channel = sampling_for("gpt-oss:20b");
        let plain = sampling_for("qwen3:8b");
        assert!(channel.temperature > plain.temperature);
        assert!(channel.max_tokens < plain.max_tokens);
    }

    #[test]
    fn proofread_prompt_differs_by_family() {
        let tagged = build_prompt(Mode::Proofread, "gpt-oss:20b", "Fix this.", "text");
        let plain = build_prompt(Mode::Proofread, "qwen3:8b", "Fix this.", "text");
        assert!(tagged.user.contains("final channel"));
        assert!(!tagged.user.contains("PART 1"));
        assert!(plain.user.contains("<think>"));
        assert!(plain.user.contains("Input Text to Proofread"));
    }
}
