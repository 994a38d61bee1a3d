//! Prompt construction
//!
//! Builds the system messages that steer the model through the questionnaire.
//! The model marks progress with tags that the orchestrator looks for:
//! `\done` after a batch of questions is answered, `\yes` / `\no` after an
//! if-question.

use questionnaire::FlatQuestion;

/// First system message of every conversation
pub fn initial_system_prompt() -> String {
    "You are a doctor holding a follow-up conversation with a patient over chat. \
     You ask questions and the patient (the user) answers. Write only your own lines as the doctor: \
     one short, natural, conversational message at a time, never the patient's lines. \
     The questions you are given are topics for the conversation, not a form: rephrase them the way \
     a doctor would ask them. Ask one thing at a time, rephrase when the patient cannot answer, \
     and stay polite and patient. Besides the patient's messages you will receive notes about \
     which questions to ask next; only you can see those notes."
        .to_string()
}

/// Greeting sent before the first question
pub fn initial_response() -> String {
    "Hello! I'm your follow-up assistant. How are you feeling right now? Any complaints?"
        .to_string()
}

/// System message introducing a batch of plain questions
pub fn questions_prompt(questions: &[String], stage_name: &str) -> String {
    let mut prompt = format!("Current topic: {}", stage_name);
    prompt.push_str("\n\nQuestions the patient should answer now:\n");
    prompt.push_str(&questions.join("\n"));
    prompt.push_str(
        "\n\nOnce the patient has answered these questions, write \"\\done\" to move on \
         to the next questions.",
    );
    prompt
}

/// System message introducing a single if-question
pub fn if_question_prompt(question: &str, stage_name: &str) -> String {
    let mut prompt = format!("Current topic: {}", stage_name);
    prompt.push_str("\n\nQuestion the patient should answer:\n");
    prompt.push_str(question);
    prompt.push_str(
        "\n\nThe next questions depend on this answer. Once the patient has answered, \
         write \"\\yes\" if the answer is affirmative and \"\\no\" if it is negative.",
    );
    prompt
}

/// Request for the answers of one stage as `id: answer` lines
pub fn answers_list_prompt(questions: &[FlatQuestion]) -> String {
    let listing = questions
        .iter()
        .map(|q| format!("{}: {}", q.id, q.text))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Write down the patient's answers to the following questions, one per line, \
         in the format \"id: answer\". If the patient gave no answer, write None. Questions:\n{}",
        listing
    )
}

/// Message sent once the last stage is finished
pub fn final_response() -> String {
    "Thank you, that was the last of my questions. Take care! \
     Send /restart if you want to go through the questionnaire again."
        .to_string()
}
