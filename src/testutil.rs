//! Score builders shared by unit tests.

use crate::model::*;

pub(crate) fn note(step: &str, octave: i32, duration: i32) -> Note {
    Note::pitched(Pitch::new(step, octave, None), duration)
}

pub(crate) fn chord_note(step: &str, octave: i32, duration: i32) -> Note {
    Note {
        chord: true,
        ..note(step, octave, duration)
    }
}

/// 4/4 measure with one division per quarter.
pub(crate) fn measure(number: i32, notes: Vec<Note>) -> Measure {
    Measure {
        attributes: (number == 1).then(|| Attributes {
            divisions: Some(1),
            time: Some(TimeSignature::default()),
        }),
        notes,
        ..Measure::new(number)
    }
}

pub(crate) fn score(measures: Vec<Measure>) -> Score {
    Score {
        title: Some("Test".to_string()),
        parts: vec![Part {
            id: "P1".to_string(),
            name: "Piano".to_string(),
            measures,
        }],
        ..Score::default()
    }
}

/// `count` measures of C D E F quarter notes.
pub(crate) fn scale_score(count: usize) -> Score {
    let measures = (1..=count as i32)
        .map(|n| {
            measure(
                n,
                vec![note("C", 4, 1), note("D", 4, 1), note("E", 4, 1), note("F", 4, 1)],
            )
        })
        .collect();
    score(measures)
}
