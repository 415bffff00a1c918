//! Typing-pace model.
//!
//! Every draw is an independent uniform integer in an inclusive millisecond
//! range. Randomness is injected so callers can seed it.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Delay between two words.
pub const SPACE_DELAY: DelayRange = DelayRange::new(20, 40);

/// Settle time between the last keystroke and the send.
pub const SEND_SETTLE_DELAY: Duration = Duration::from_millis(400);

const SHORT_WORD_MAX_CHARS: usize = 3;
const MEDIUM_WORD_MAX_CHARS: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl DelayRange {
    pub const fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let (lo, hi) = if self.min_ms <= self.max_ms {
            (self.min_ms, self.max_ms)
        } else {
            (self.max_ms, self.min_ms)
        };
        Duration::from_millis(rng.gen_range(lo..=hi))
    }

    pub fn contains(&self, d: Duration) -> bool {
        let ms = d.as_millis();
        ms >= u128::from(self.min_ms) && ms <= u128::from(self.max_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PersonalityProfile {
    pub name: &'static str,
    pub short_word: DelayRange,
    pub medium_word: DelayRange,
    pub long_word: DelayRange,
    pub pause_probability: f64,
    pub pause: DelayRange,
    pub thinking: DelayRange,
}

const FAST: PersonalityProfile = PersonalityProfile {
    name: "Быстрый печатник",
    short_word: DelayRange::new(25, 45),
    medium_word: DelayRange::new(35, 60),
    long_word: DelayRange::new(40, 75),
    pause_probability: 0.08,
    pause: DelayRange::new(80, 200),
    thinking: DelayRange::new(400, 800),
};

const MEDIUM: PersonalityProfile = PersonalityProfile {
    name: "Обычный печатник",
    short_word: DelayRange::new(35, 55),
    medium_word: DelayRange::new(45, 75),
    long_word: DelayRange::new(55, 95),
    pause_probability: 0.12,
    pause: DelayRange::new(150, 350),
    thinking: DelayRange::new(600, 1200),
};

const SLOW: PersonalityProfile = PersonalityProfile {
    name: "Медленный печатник",
    short_word: DelayRange::new(50, 85),
    medium_word: DelayRange::new(65, 110),
    long_word: DelayRange::new(80, 140),
    pause_probability: 0.18,
    pause: DelayRange::new(200, 500),
    thinking: DelayRange::new(800, 1500),
};

const INCONSISTENT: PersonalityProfile = PersonalityProfile {
    name: "Непостоянный печатник",
    short_word: DelayRange::new(25, 70),
    medium_word: DelayRange::new(35, 90),
    long_word: DelayRange::new(45, 120),
    pause_probability: 0.15,
    pause: DelayRange::new(120, 400),
    thinking: DelayRange::new(500, 1100),
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Personality {
    Fast,
    Medium,
    Slow,
    Inconsistent,
}

impl Personality {
    pub const ALL: [Personality; 4] = [
        Personality::Fast,
        Personality::Medium,
        Personality::Slow,
        Personality::Inconsistent,
    ];

    pub fn profile(self) -> &'static PersonalityProfile {
        match self {
            Personality::Fast => &FAST,
            Personality::Medium => &MEDIUM,
            Personality::Slow => &SLOW,
            Personality::Inconsistent => &INCONSISTENT,
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            Personality::Fast => "FAST",
            Personality::Medium => "MEDIUM",
            Personality::Slow => "SLOW",
            Personality::Inconsistent => "INCONSISTENT",
        }
    }

    /// Selection weight in percent.
    pub fn weight(self) -> u32 {
        match self {
            Personality::Fast => 25,
            Personality::Medium => 40,
            Personality::Slow => 20,
            Personality::Inconsistent => 15,
        }
    }
}

/// Timing computed for one outgoing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingPlan {
    pub personality: Personality,
    pub thinking_ms: u64,
    pub typing_ms: u64,
}

pub fn choose_personality<R: Rng + ?Sized>(rng: &mut R) -> Personality {
    let total: u32 = Personality::ALL.iter().map(|p| p.weight()).sum();
    let roll = rng.gen_range(0..total);
    let mut cumulative = 0;
    for personality in Personality::ALL {
        cumulative += personality.weight();
        if roll < cumulative {
            return personality;
        }
    }
    Personality::Medium
}

/// Range used for every character of `word`, bucketed by character count.
pub fn word_range<'a>(word: &str, profile: &'a PersonalityProfile) -> &'a DelayRange {
    let len = word.chars().count();
    if len <= SHORT_WORD_MAX_CHARS {
        &profile.short_word
    } else if len <= MEDIUM_WORD_MAX_CHARS {
        &profile.medium_word
    } else {
        &profile.long_word
    }
}

pub fn word_delay<R: Rng + ?Sized>(word: &str, profile: &PersonalityProfile, rng: &mut R) -> Duration {
    word_range(word, profile).sample(rng)
}

pub fn thinking_delay<R: Rng + ?Sized>(profile: &PersonalityProfile, rng: &mut R) -> Duration {
    profile.thinking.sample(rng)
}

pub fn pause_roll<R: Rng + ?Sized>(profile: &PersonalityProfile, rng: &mut R) -> bool {
    rng.gen_bool(profile.pause_probability.clamp(0.0, 1.0))
}

pub fn pause_delay<R: Rng + ?Sized>(profile: &PersonalityProfile, rng: &mut R) -> Duration {
    profile.pause.sample(rng)
}

pub fn space_delay<R: Rng + ?Sized>(rng: &mut R) -> Duration {
    SPACE_DELAY.sample(rng)
}

/// Realistic typing time for `message` without waiting for it.
pub fn estimate_typing_duration<R: Rng + ?Sized>(
    message: &str,
    profile: &PersonalityProfile,
    rng: &mut R,
) -> Duration {
    let words: Vec<&str> = message.split(' ').collect();
    let last = words.len().saturating_sub(1);
    let mut total = Duration::ZERO;
    for (index, word) in words.iter().enumerate() {
        for _ in word.chars() {
            total += word_delay(word, profile, rng);
        }
        if index < last {
            total += space_delay(rng);
        }
        if pause_roll(profile, rng) {
            total += pause_delay(profile, rng);
        }
    }
    total
}

/// Per-suspension delays for typing `message` in real time: one entry per
/// character, one per inter-word space and one per inter-word pause.
pub fn keystroke_schedule<R: Rng + ?Sized>(
    message: &str,
    profile: &PersonalityProfile,
    rng: &mut R,
) -> Vec<Duration> {
    let words: Vec<&str> = message.split(' ').collect();
    let last = words.len().saturating_sub(1);
    let mut steps = Vec::with_capacity(message.len() + words.len());
    for (index, word) in words.iter().enumerate() {
        for _ in word.chars() {
            steps.push(word_delay(word, profile, rng));
        }
        if index < last {
            steps.push(space_delay(rng));
            if pause_roll(profile, rng) {
                steps.push(pause_delay(profile, rng));
            }
        }
    }
    steps
}

/// Picks a personality and draws thinking and estimated typing time.
pub fn plan_typing<R: Rng + ?Sized>(message: &str, rng: &mut R) -> TypingPlan {
    let personality = choose_personality(rng);
    let profile = personality.profile();
    let thinking = thinking_delay(profile, rng);
    let typing = estimate_typing_duration(message, profile, rng);
    TypingPlan {
        personality,
        thinking_ms: duration_ms(thinking),
        typing_ms: duration_ms(typing),
    }
}

pub fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
