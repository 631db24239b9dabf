//! Form resolution over MusicXML navigation markings.

use practicelib::{
    parse_musicxml, EngineConfig, FormResolver, JumpTarget, NextMeasure, RepeatMarking, Timeline,
};
use pretty_assertions::assert_eq;

/// Wrap measure bodies into a one-part 4/4 score, one whole note each.
fn score_xml(measures: &[&str]) -> String {
    let mut body = String::new();
    for (i, extra) in measures.iter().enumerate() {
        let attributes = if i == 0 {
            "<attributes><divisions>1</divisions><time><beats>4</beats><beat-type>4</beat-type></time></attributes>"
        } else {
            ""
        };
        body.push_str(&format!(
            r#"<measure number="{}">{attributes}{extra}<note><pitch><step>C</step><octave>4</octave></pitch><duration>4</duration></note></measure>"#,
            i + 1
        ));
    }
    format!(
        r#"<?xml version="1.0"?>
<score-partwise>
  <part-list><score-part id="P1"><part-name>Piano</part-name></score-part></part-list>
  <part id="P1">{body}</part>
</score-partwise>"#
    )
}

fn resolver_with(measures: &[&str], config: EngineConfig) -> (Timeline, FormResolver) {
    let score = parse_musicxml(&score_xml(measures)).expect("Failed to parse score");
    let timeline = Timeline::from_score(&score, config.timeline);
    let form = FormResolver::from_score(&score, &timeline, config.form);
    (timeline, form)
}

fn resolver(measures: &[&str]) -> (Timeline, FormResolver) {
    resolver_with(measures, EngineConfig::default())
}

const SEGNO: &str = r#"<direction><direction-type><segno/></direction-type><sound segno="s1"/></direction>"#;
const TO_CODA: &str = r#"<direction><direction-type><words>To Coda</words></direction-type><sound tocoda="c1"/></direction>"#;
const CODA: &str = r#"<direction><direction-type><coda/></direction-type><sound coda="c1"/></direction>"#;
const DAL_SEGNO: &str = r#"<direction><direction-type><words>D.S. al Coda</words></direction-type><sound dalsegno="s1"/></direction>"#;

#[test]
fn dal_segno_al_coda() {
    let mut config = EngineConfig::default();
    config.form.coda_after_jump = true;
    let (timeline, form) = resolver_with(&["", SEGNO, TO_CODA, DAL_SEGNO, CODA, ""], config);
    assert_eq!(timeline.measure_count(), 6);
    assert!(timeline.has_musical_repeats());
    assert_eq!(
        form.generate_play_order(6),
        vec![0, 1, 2, 3, 1, 2, 4, 5]
    );
}

#[test]
fn dal_segno_ignores_to_coda_until_enabled() {
    let (_, mut form) = resolver(&["", SEGNO, TO_CODA, DAL_SEGNO, CODA, ""]);
    assert_eq!(
        form.generate_play_order(6),
        vec![0, 1, 2, 3, 1, 2, 3, 4, 5]
    );

    // Enabled by the caller on the second pass
    let mut order = vec![0];
    let mut current = 0;
    while let NextMeasure::Measure(next) = form.next_measure(current) {
        if form.jump_taken() {
            form.set_coda_jump_enabled(true);
        }
        order.push(next);
        current = next;
    }
    assert_eq!(order, vec![0, 1, 2, 3, 1, 2, 4, 5]);
}

#[test]
fn markings_point_at_their_signs() {
    let (_, form) = resolver(&["", SEGNO, TO_CODA, DAL_SEGNO, CODA, ""]);
    let jumps: Vec<(usize, Option<JumpTarget>)> = form
        .markings()
        .iter()
        .filter(|m| m.target().is_some())
        .map(|m| (m.measure(), m.target()))
        .collect();
    assert_eq!(
        jumps,
        vec![
            (2, Some(JumpTarget::Resolved(4))),
            (3, Some(JumpTarget::Resolved(1))),
        ]
    );
}

#[test]
fn end_repeat_without_start_is_inert() {
    let backward = r#"<barline location="right"><bar-style>light-heavy</bar-style><repeat direction="backward"/></barline>"#;
    let mut measures = vec![""; 10];
    measures[8] = backward;
    let (_, mut form) = resolver(&measures);

    assert_eq!(
        form.markings(),
        &[RepeatMarking::RepeatEnd {
            measure: 8,
            target: JumpTarget::Unresolved
        }]
    );
    assert_eq!(form.next_measure(8), NextMeasure::Measure(9));
    assert_eq!(form.generate_play_order(10), (0..10).collect::<Vec<_>>());
}
