//! Per-question runtime.
//!
//! A [`QuestionEngine`] drives exactly one question instance through
//! `Armed → (Displaying | WaitingForStimulus) → Captured` and yields at most one
//! [`Answer`]. Timers it schedules are owned by the engine and cancelled on
//! capture or teardown.

use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;
use tokio::time::Instant;

use crate::model::{
    Answer, QuestionKind, ReactionMode, TestQuestion, VariantFamily, PAYLOAD_SEPARATOR,
};
use crate::scheduler::{ScheduledTask, TimerEvent, TimerKind, TimerSink};

/// Token used for reaction questions that define no stimulus.
pub const DEFAULT_STIMULUS: &str = "click";

/// How the user enters an answer once input is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    SingleChoice,
    /// Toggle any number of options; the answer is the sorted set.
    MultiChoice,
    /// Assign one answer option to each prompt option, in slot order.
    Pairing,
    FreeText,
}

impl InputMode {
    pub fn for_question(question: &TestQuestion) -> Self {
        if question.options().is_empty() {
            return InputMode::FreeText;
        }
        if question.kind == QuestionKind::Pairs {
            return InputMode::Pairing;
        }
        let reconstruct = matches!(
            question.kind,
            QuestionKind::Words | QuestionKind::Images | QuestionKind::Sequence
        );
        if question.multiple_select.unwrap_or(reconstruct) {
            InputMode::MultiChoice
        } else {
            InputMode::SingleChoice
        }
    }
}

/// Material shown during the display phase of a recall question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Material {
    /// The prompt as given.
    pub text: String,
    /// Discrete items to memorize; empty when none could be extracted.
    pub items: Vec<String>,
}

impl Material {
    pub fn for_question(question: &TestQuestion) -> Self {
        let items = match question.kind {
            QuestionKind::Images => {
                let mut images: Vec<String> = question.images.clone().unwrap_or_default();
                if let Some(image) = &question.image {
                    images.push(image.clone());
                }
                images
            }
            QuestionKind::Matrix => cells(question.matrix.as_deref()),
            QuestionKind::Grid => cells(question.grid.as_deref()),
            QuestionKind::Pairs => question.options().to_vec(),
            _ => Vec::new(),
        };
        let items = if items.is_empty() {
            extract_items(&question.prompt)
        } else {
            items
        };

        Self {
            text: question.prompt.clone(),
            items,
        }
    }
}

fn cells(rows: Option<&[Vec<serde_json::Value>]>) -> Vec<String> {
    rows.unwrap_or_default()
        .iter()
        .flatten()
        .filter(|cell| !cell.is_null())
        .map(|cell| match cell {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect()
}

/// Pull the memorize-list out of a prompt like `"Remember: 4, 9, 2"`.
///
/// Items follow the last colon and are comma-separated, or
/// whitespace-separated when there is no comma. Returns an empty list when
/// the prompt has no such tail.
pub fn extract_items(prompt: &str) -> Vec<String> {
    let Some((_, tail)) = prompt.rsplit_once(':') else {
        return Vec::new();
    };
    let tail = tail.trim().trim_end_matches('.');
    let parts: Vec<&str> = if tail.contains(',') {
        tail.split(',').collect()
    } else {
        tail.split_whitespace().collect()
    };
    parts
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// A user action directed at the current question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interaction {
    /// Pick one option (single choice).
    Choose(String),
    /// Add or remove an option (multi choice).
    Toggle(String),
    /// Fill a pairing slot.
    Assign { slot: usize, value: String },
    /// Replace the free-text entry.
    Text(String),
    /// Commit the current selection.
    Submit,
    /// Click the reaction target.
    Click,
    /// Pick a side in a choice-reaction question.
    Respond(String),
}

/// Timing parameters for reaction questions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuestionTiming {
    /// Upper bound (exclusive) of the random extra wait before a stimulus.
    pub stimulus_jitter: Duration,
    /// How long a stimulus waits for a response before auto-completing.
    pub response_window: Duration,
}

impl Default for QuestionTiming {
    fn default() -> Self {
        Self {
            stimulus_jitter: Duration::from_millis(500),
            response_window: Duration::from_secs(3),
        }
    }
}

/// What the presentation layer should show for the question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuestionPhase {
    Armed,
    Displaying { material: Material },
    WaitingForStimulus,
    StimulusShown { stimulus: String },
    AwaitingInput { mode: InputMode, options: Vec<String> },
    Captured,
    /// Torn down before an answer was captured.
    Closed,
}

#[derive(Debug)]
enum Phase {
    Armed,
    Displaying,
    WaitingForStimulus,
    Stimulus { value: String, revealed_at: Instant },
    Input,
    Captured,
    Closed,
}

#[derive(Debug, Default)]
struct Selection {
    single: Option<String>,
    multi: Vec<String>,
    slots: Vec<Option<String>>,
    text: String,
}

/// Runtime for one question instance.
#[derive(Debug)]
pub struct QuestionEngine {
    index: usize,
    question: TestQuestion,
    family: VariantFamily,
    mode: InputMode,
    material: Option<Material>,
    timing: QuestionTiming,
    phase: Phase,
    selection: Selection,
    timer: Option<ScheduledTask>,
    epoch: u64,
    false_starts: u32,
}

impl QuestionEngine {
    pub fn new(index: usize, question: TestQuestion, timing: QuestionTiming) -> Self {
        let family = question.kind.family();
        let mode = InputMode::for_question(&question);
        let material = (family == VariantFamily::Recall).then(|| {
            let material = Material::for_question(&question);
            if material.items.is_empty() {
                tracing::warn!(
                    question = %question.id,
                    "no recall items found, showing the raw prompt"
                );
            }
            material
        });
        let selection = Selection {
            slots: vec![None; if mode == InputMode::Pairing { question.options().len() } else { 0 }],
            ..Selection::default()
        };

        Self {
            index,
            question,
            family,
            mode,
            material,
            timing,
            phase: Phase::Armed,
            selection,
            timer: None,
            epoch: 0,
            false_starts: 0,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn question(&self) -> &TestQuestion {
        &self.question
    }

    pub fn family(&self) -> VariantFamily {
        self.family
    }

    pub fn input_mode(&self) -> InputMode {
        self.mode
    }

    /// Clicks that landed before the stimulus appeared.
    pub fn false_starts(&self) -> u32 {
        self.false_starts
    }

    pub fn is_captured(&self) -> bool {
        matches!(self.phase, Phase::Captured)
    }

    /// Whether a submitted payload would be accepted right now.
    pub fn accepts_input(&self) -> bool {
        matches!(self.phase, Phase::Input | Phase::Stimulus { .. })
    }

    /// Enter the first phase and schedule its timer, if any.
    pub fn arm<R: Rng + ?Sized>(&mut self, rng: &mut R, timers: &TimerSink) {
        if !matches!(self.phase, Phase::Armed) {
            return;
        }
        match self.family {
            VariantFamily::Recall => {
                let delay = self.question.delay();
                if delay.is_zero() {
                    self.phase = Phase::Input;
                } else {
                    self.phase = Phase::Displaying;
                    self.schedule(delay, TimerKind::DisplayElapsed, timers);
                }
            }
            VariantFamily::Reaction(_) => {
                let wait = self.question.delay().saturating_add(self.jitter(rng));
                self.phase = Phase::WaitingForStimulus;
                self.schedule(wait, TimerKind::StimulusDue, timers);
            }
            VariantFamily::Direct => self.phase = Phase::Input,
        }
        tracing::debug!(question = %self.question.id, phase = ?self.phase, "question armed");
    }

    /// Handle a fired timer. Events for another instance or a superseded
    /// schedule are ignored.
    pub fn on_timer<R: Rng + ?Sized>(
        &mut self,
        event: TimerEvent,
        now: Instant,
        rng: &mut R,
        timers: &TimerSink,
    ) -> Option<Answer> {
        if event.question_index != self.index || event.epoch != self.epoch {
            tracing::debug!(?event, "ignoring stale timer event");
            return None;
        }
        self.timer = None;

        match event.kind {
            TimerKind::DisplayElapsed => {
                if matches!(self.phase, Phase::Displaying) {
                    self.phase = Phase::Input;
                }
                None
            }
            TimerKind::StimulusDue => {
                if matches!(self.phase, Phase::WaitingForStimulus) {
                    let value = self.draw_stimulus(rng);
                    tracing::debug!(question = %self.question.id, stimulus = %value, "stimulus shown");
                    self.phase = Phase::Stimulus {
                        value,
                        revealed_at: now,
                    };
                    self.schedule(
                        self.timing.response_window,
                        TimerKind::ResponseWindowElapsed,
                        timers,
                    );
                }
                None
            }
            TimerKind::ResponseWindowElapsed => match &self.phase {
                Phase::Stimulus { value, .. } => {
                    let answer = Answer::no_response(value);
                    self.capture(answer)
                }
                _ => None,
            },
        }
    }

    /// Apply a user interaction. Returns the answer if this interaction
    /// completed the question.
    pub fn interact(&mut self, interaction: Interaction, now: Instant) -> Option<Answer> {
        match &self.phase {
            Phase::Armed | Phase::Captured | Phase::Closed => None,
            Phase::Displaying => {
                tracing::debug!(question = %self.question.id, "input ignored during display");
                None
            }
            Phase::WaitingForStimulus => {
                if matches!(interaction, Interaction::Click | Interaction::Respond(_)) {
                    self.false_starts += 1;
                    tracing::debug!(question = %self.question.id, "false start");
                }
                None
            }
            Phase::Stimulus { value, revealed_at } => {
                let VariantFamily::Reaction(mode) = self.family else {
                    return None;
                };
                let reaction_ms = now.saturating_duration_since(*revealed_at).as_millis() as u64;
                let answer = match (mode, interaction) {
                    (ReactionMode::Simple | ReactionMode::GoNoGo, Interaction::Click) => {
                        Answer::reaction(value, reaction_ms)
                    }
                    (ReactionMode::Choice, Interaction::Respond(side)) => {
                        let side = side.trim();
                        if side.is_empty() || side.contains(PAYLOAD_SEPARATOR) {
                            tracing::debug!(question = %self.question.id, side, "response rejected");
                            return None;
                        }
                        Answer::choice_reaction(value, side, reaction_ms)
                    }
                    _ => return None,
                };
                self.capture(answer)
            }
            Phase::Input => self.handle_input(interaction),
        }
    }

    /// Accept a fully formed payload, if input is currently open.
    pub fn submit_raw(&mut self, payload: impl Into<String>) -> Option<Answer> {
        if !self.accepts_input() {
            tracing::debug!(question = %self.question.id, "answer ignored, input not open");
            return None;
        }
        self.capture(Answer::new(payload))
    }

    /// Cancel pending timers without emitting an answer.
    pub fn teardown(&mut self) {
        self.cancel_timer();
        if !matches!(self.phase, Phase::Captured) {
            self.phase = Phase::Closed;
        }
    }

    pub fn phase(&self) -> QuestionPhase {
        match &self.phase {
            Phase::Armed => QuestionPhase::Armed,
            Phase::Displaying => QuestionPhase::Displaying {
                material: self
                    .material
                    .clone()
                    .unwrap_or_else(|| Material::for_question(&self.question)),
            },
            Phase::WaitingForStimulus => QuestionPhase::WaitingForStimulus,
            Phase::Stimulus { value, .. } => QuestionPhase::StimulusShown {
                stimulus: value.clone(),
            },
            Phase::Input => QuestionPhase::AwaitingInput {
                mode: self.mode,
                options: self.input_options().to_vec(),
            },
            Phase::Captured => QuestionPhase::Captured,
            Phase::Closed => QuestionPhase::Closed,
        }
    }

    fn input_options(&self) -> &[String] {
        match self.mode {
            InputMode::Pairing => self.question.answer_options(),
            _ => self.question.options(),
        }
    }

    fn handle_input(&mut self, interaction: Interaction) -> Option<Answer> {
        match interaction {
            Interaction::Choose(option) => {
                if self.is_offered(&option) {
                    self.selection.single = Some(option);
                }
                None
            }
            Interaction::Toggle(option) => {
                if self.is_offered(&option) {
                    let multi = &mut self.selection.multi;
                    match multi.iter().position(|o| *o == option) {
                        Some(pos) => {
                            multi.remove(pos);
                        }
                        None => multi.push(option),
                    }
                }
                None
            }
            Interaction::Assign { slot, value } => {
                let allowed = self.question.answer_options();
                let valid = allowed.is_empty() || allowed.contains(&value);
                if let (true, Some(entry)) = (valid, self.selection.slots.get_mut(slot)) {
                    *entry = Some(value);
                }
                None
            }
            Interaction::Text(text) => {
                self.selection.text = text;
                None
            }
            Interaction::Submit => {
                let answer = self.build_answer()?;
                self.capture(answer)
            }
            Interaction::Click | Interaction::Respond(_) => None,
        }
    }

    fn is_offered(&self, option: &str) -> bool {
        let offered = self.question.options().iter().any(|o| o == option);
        if !offered {
            tracing::debug!(question = %self.question.id, option, "option not offered");
        }
        offered
    }

    fn build_answer(&self) -> Option<Answer> {
        match self.mode {
            InputMode::SingleChoice => self.selection.single.clone().map(Answer::new),
            InputMode::MultiChoice => {
                (!self.selection.multi.is_empty()).then(|| Answer::multi(&self.selection.multi))
            }
            InputMode::Pairing => {
                let slots = &self.selection.slots;
                (!slots.is_empty() && slots.iter().all(Option::is_some))
                    .then(|| Answer::pairs(slots.iter().flatten()))
            }
            InputMode::FreeText => {
                let text = self.selection.text.trim();
                (!text.is_empty()).then(|| Answer::new(text))
            }
        }
    }

    fn draw_stimulus<R: Rng + ?Sized>(&self, rng: &mut R) -> String {
        let stimulus = self
            .question
            .stimuli()
            .choose(rng)
            .map(|s| s.to_string())
            .unwrap_or_else(|| DEFAULT_STIMULUS.to_string());
        if stimulus.contains(PAYLOAD_SEPARATOR) {
            tracing::warn!(
                question = %self.question.id,
                stimulus = %stimulus,
                "stimulus contains '{PAYLOAD_SEPARATOR}', the answer will not decode"
            );
        }
        stimulus
    }

    fn jitter<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let max_ms = self.timing.stimulus_jitter.as_millis() as u64;
        if max_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rng.gen_range(0..max_ms))
        }
    }

    fn schedule(&mut self, delay: Duration, kind: TimerKind, timers: &TimerSink) {
        self.cancel_timer();
        self.epoch += 1;
        let event = TimerEvent {
            question_index: self.index,
            epoch: self.epoch,
            kind,
        };
        self.timer = Some(ScheduledTask::schedule(delay, timers, event));
    }

    fn cancel_timer(&mut self) {
        if let Some(task) = self.timer.take() {
            task.cancel();
        }
    }

    fn capture(&mut self, answer: Answer) -> Option<Answer> {
        self.cancel_timer();
        self.phase = Phase::Captured;
        tracing::debug!(question = %self.question.id, answer = %answer, "answer captured");
        Some(answer)
    }
}
