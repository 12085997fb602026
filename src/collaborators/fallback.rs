//! Canned examiner lines used when the AI service cannot be reached.

use rand::seq::SliceRandom;

use crate::exam::phase::ExamPhase;

const GREETINGS: &[&str] = &[
    "Hello! Welcome to your IELTS Speaking practice session. My name is Sarah and I'll be your examiner today. Can you please tell me your full name?",
    "Good morning! I'm David, your IELTS speaking examiner. Let's start with your name - could you tell me what I should call you?",
    "Hello there! I'm Lisa and I'll be conducting your IELTS speaking test today. To begin, could you please state your full name for me?",
];

const PART_ONE_QUESTIONS: &[&str] = &[
    "Can you tell me about your hometown?",
    "What do you like to do in your free time?",
    "Do you work or study?",
    "What kind of music do you enjoy?",
];

const PART_TWO_QUESTIONS: &[&str] = &[
    "Describe a memorable day from your past. You should say: what day it was, what happened, who you were with, and explain why it was memorable.",
    "Describe a place you like to visit. You should say: where it is, what you can do there, who you go there with, and explain why you like this place.",
];

const PART_THREE_QUESTIONS: &[&str] = &[
    "How do you think technology has changed the way people communicate?",
    "What are the advantages and disadvantages of living in a big city?",
    "Do you think it's important for people to learn about other cultures?",
    "How might education change in the future?",
];

const CLOSING_REPLY: &str = "Thank you. That is the end of the speaking test.";

fn pick(options: &'static [&'static str]) -> &'static str {
    options
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(CLOSING_REPLY)
}

/// Opening line for a new connection.
pub fn greeting() -> &'static str {
    pick(GREETINGS)
}

/// A question from the fixed bank for `phase`.
pub fn question(phase: ExamPhase) -> &'static str {
    match phase {
        ExamPhase::One => pick(PART_ONE_QUESTIONS),
        ExamPhase::Two => pick(PART_TWO_QUESTIONS),
        ExamPhase::Three => pick(PART_THREE_QUESTIONS),
        ExamPhase::Complete => CLOSING_REPLY,
    }
}

/// Examiner reply when the Responder fails.
pub fn reply(phase: ExamPhase) -> &'static str {
    question(phase)
}
