//! Turns a consolidated window into a short English sentence.

use crate::pipeline::ConsolidatedState;

/// Which categories are stable enough to mention.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DescribePolicy {
    /// Fraction of the window's frames a category must appear in.
    pub min_presence: f32,
    /// Best confidence a category must reach somewhere in the window.
    pub min_confidence: f32,
}

impl Default for DescribePolicy {
    fn default() -> Self {
        Self {
            min_presence: 0.5,
            min_confidence: 0.0,
        }
    }
}

/// "I see a person and two cups." / "I don't see anything."
///
/// Categories are listed in order of first appearance in the window, each with
/// the largest count seen in any single frame.
pub fn describe(state: &ConsolidatedState, policy: &DescribePolicy) -> String {
    let phrases: Vec<String> = state
        .categories
        .iter()
        .filter(|category| {
            state.presence(category) >= policy.min_presence
                && category.max_confidence >= policy.min_confidence
        })
        .map(|category| quantity_phrase(category.max_count, &category.category))
        .collect();

    match phrases.as_slice() {
        [] => "I don't see anything.".to_string(),
        [only] => format!("I see {only}."),
        [rest @ .., last] => format!("I see {} and {last}.", rest.join(", ")),
    }
}

/// "a cup", "an apple", "three people", "12 cars".
pub fn quantity_phrase(count: usize, noun: &str) -> String {
    match count {
        0 => format!("no {}", plural(noun)),
        1 => format!("{} {noun}", article(noun)),
        2..=10 => format!("{} {}", NUMBER_WORDS[count - 2], plural(noun)),
        _ => format!("{count} {}", plural(noun)),
    }
}

const NUMBER_WORDS: [&str; 9] = [
    "two", "three", "four", "five", "six", "seven", "eight", "nine", "ten",
];

fn article(noun: &str) -> &'static str {
    match noun.chars().next().map(|c| c.to_ascii_lowercase()) {
        Some('a' | 'e' | 'i' | 'o' | 'u') => "an",
        _ => "a",
    }
}

const IRREGULAR: &[(&str, &str)] = &[
    ("person", "people"),
    ("mouse", "mice"),
    ("knife", "knives"),
    ("sheep", "sheep"),
    ("skis", "skis"),
    ("scissors", "scissors"),
    ("child", "children"),
    ("man", "men"),
    ("woman", "women"),
];

/// Pluralises the last word of a (possibly multi-word) noun.
fn plural(noun: &str) -> String {
    let (head, last) = match noun.rsplit_once(' ') {
        Some((head, last)) => (Some(head), last),
        None => (None, noun),
    };

    let word = if let Some((_, irregular)) = IRREGULAR.iter().find(|(one, _)| *one == last) {
        (*irregular).to_string()
    } else if ["s", "x", "z", "ch", "sh"].iter().any(|end| last.ends_with(end)) {
        format!("{last}es")
    } else if last.len() > 1
        && last.ends_with('y')
        && !matches!(
            last.as_bytes()[last.len() - 2],
            b'a' | b'e' | b'i' | b'o' | b'u'
        )
    {
        format!("{}ies", &last[..last.len() - 1])
    } else {
        format!("{last}s")
    };

    match head {
        Some(head) => format!("{head} {word}"),
        None => word,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::CategoryState;

    fn category(name: &str, frames_present: usize, max_count: usize) -> CategoryState {
        CategoryState {
            category: name.to_string(),
            frames_present,
            max_count,
            max_confidence: 0.9,
            mean_confidence: 0.8,
        }
    }

    fn state(categories: Vec<CategoryState>) -> ConsolidatedState {
        ConsolidatedState {
            frame_index: 5,
            window_len: 5,
            categories,
        }
    }

    #[test]
    fn lists_stable_categories_with_counts() {
        let state = state(vec![
            category("person", 5, 1),
            category("cup", 3, 2),
            category("dog", 1, 1),
        ]);
        assert_eq!(
            describe(&state, &DescribePolicy::default()),
            "I see a person and two cups."
        );
    }

    #[test]
    fn joins_longer_lists_with_commas() {
        let state = state(vec![
            category("person", 5, 3),
            category("wine glass", 4, 2),
            category("apple", 5, 1),
        ]);
        assert_eq!(
            describe(&state, &DescribePolicy::default()),
            "I see three people, two wine glasses and an apple."
        );
    }

    #[test]
    fn empty_window_sees_nothing() {
        assert_eq!(
            describe(&state(Vec::new()), &DescribePolicy::default()),
            "I don't see anything."
        );
        let flicker = state(vec![category("cat", 1, 1)]);
        assert_eq!(
            describe(&flicker, &DescribePolicy::default()),
            "I don't see anything."
        );
    }

    #[test]
    fn confidence_floor_hides_weak_categories() {
        let mut weak = category("kite", 5, 1);
        weak.max_confidence = 0.2;
        let policy = DescribePolicy {
            min_presence: 0.0,
            min_confidence: 0.5,
        };
        assert_eq!(
            describe(&state(vec![weak, category("bus", 5, 2)]), &policy),
            "I see two buses."
        );
    }

    #[test]
    fn plurals() {
        assert_eq!(quantity_phrase(2, "teddy bear"), "two teddy bears");
        assert_eq!(quantity_phrase(4, "knife"), "four knives");
        assert_eq!(quantity_phrase(2, "skis"), "two skis");
        assert_eq!(quantity_phrase(11, "car"), "11 cars");
        assert_eq!(quantity_phrase(1, "umbrella"), "an umbrella");
        assert_eq!(quantity_phrase(3, "toothbrush"), "three toothbrushes");
        assert_eq!(quantity_phrase(2, "butterfly"), "two butterflies");
        assert_eq!(quantity_phrase(2, "toy"), "two toys");
    }
}
