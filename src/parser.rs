//! MusicXML parser: converts MusicXML XML into the Score data model.
//!
//! Only the elements the practice engine consumes are read: pitches and
//! durations, ties, grace notes, fermatas and phrase marks, barlines with
//! repeats and endings, and tempo / navigation directions.

use log::debug;
use roxmltree::{Document, Node};

use crate::error::PracticeError;
use crate::model::*;

/// Parse a MusicXML XML string into a Score.
pub fn parse_musicxml(xml: &str) -> Result<Score, PracticeError> {
    // MusicXML files include a DOCTYPE declaration, so we must allow DTDs
    let options = roxmltree::ParsingOptions {
        allow_dtd: true,
        ..Default::default()
    };
    let doc = Document::parse_with_options(xml, options)
        .map_err(|e| PracticeError::Xml(e.to_string()))?;
    let root = doc.root_element();

    if root.tag_name().name() != "score-partwise" {
        return Err(PracticeError::UnsupportedDocument(
            root.tag_name().name().to_string(),
        ));
    }

    let mut score = Score::new();
    score.version = root.attribute("version").map(String::from);

    for child in root.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "work" => parse_work(&child, &mut score),
            "movement-title" => {
                if score.title.is_none() {
                    score.title = text_of(&child);
                }
            }
            "identification" => parse_identification(&child, &mut score),
            "part-list" => parse_part_list(&child, &mut score),
            "part" => parse_part(&child, &mut score),
            _ => {}
        }
    }

    debug!(
        "parsed score {:?}: {} parts, {} measures",
        score.title,
        score.parts.len(),
        score.measure_count()
    );
    Ok(score)
}

// ─── Header ──────────────────────────────────────────────────────────

fn parse_work(node: &Node, score: &mut Score) {
    for child in node.children().filter(|n| n.is_element()) {
        if child.tag_name().name() == "work-title" {
            score.title = text_of(&child);
        }
    }
}

fn parse_identification(node: &Node, score: &mut Score) {
    for child in node.children().filter(|n| n.is_element()) {
        if child.tag_name().name() == "creator" && child.attribute("type") == Some("composer") {
            score.composer = text_of(&child);
        }
    }
}

// ─── Part List ───────────────────────────────────────────────────────

fn parse_part_list(node: &Node, score: &mut Score) {
    for child in node.children().filter(|n| n.is_element()) {
        if child.tag_name().name() != "score-part" {
            continue;
        }
        let mut part = Part {
            id: child.attribute("id").unwrap_or("").to_string(),
            ..Part::default()
        };
        for sp_child in child.children().filter(|n| n.is_element()) {
            if sp_child.tag_name().name() == "part-name" {
                part.name = text_of(&sp_child).unwrap_or_default();
            }
        }
        score.parts.push(part);
    }
}

// ─── Part (measures) ─────────────────────────────────────────────────

fn parse_part(node: &Node, score: &mut Score) {
    let part_id = node.attribute("id").unwrap_or("");

    // Tolerate documents whose part-list is missing or incomplete.
    let idx = match score.parts.iter().position(|p| p.id == part_id) {
        Some(idx) => idx,
        None => {
            score.parts.push(Part {
                id: part_id.to_string(),
                ..Part::default()
            });
            score.parts.len() - 1
        }
    };

    let part = &mut score.parts[idx];
    for child in node.children().filter(|n| n.is_element()) {
        if child.tag_name().name() == "measure" {
            part.measures.push(parse_measure(&child));
        }
    }
}

// ─── Measure ─────────────────────────────────────────────────────────

fn parse_measure(node: &Node) -> Measure {
    let number = node
        .attribute("number")
        .and_then(|n| n.parse::<i32>().ok())
        .unwrap_or(0);
    let mut measure = Measure::new(number);
    measure.implicit = node.attribute("implicit") == Some("yes");

    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "attributes" => merge_attributes(&child, &mut measure),
            "note" => measure.notes.push(parse_note(&child)),
            "barline" => measure.barlines.push(parse_barline(&child)),
            "direction" => {
                if let Some(dir) = parse_direction(&child) {
                    measure.directions.push(dir);
                }
            }
            "sound" => {
                // <sound> can appear directly in <measure> (not inside <direction>)
                let mut dir = Direction::default();
                apply_sound(&child, &mut dir);
                if has_content(&dir) {
                    measure.directions.push(dir);
                }
            }
            _ => {}
        }
    }

    measure
}

// ─── Attributes ──────────────────────────────────────────────────────

/// Later `<attributes>` blocks in the same measure only override what
/// they actually specify.
fn merge_attributes(node: &Node, measure: &mut Measure) {
    let attrs = measure.attributes.get_or_insert_with(Attributes::default);
    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "divisions" => {
                if let Some(d) = parse_i32(&child) {
                    attrs.divisions = Some(d);
                }
            }
            "time" => attrs.time = Some(parse_time(&child)),
            _ => {}
        }
    }
}

fn parse_time(node: &Node) -> TimeSignature {
    let mut ts = TimeSignature::default();
    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            // "3+2" style additive numerators are summed
            "beats" => {
                ts.beats = child
                    .text()
                    .map(|t| {
                        t.split('+')
                            .filter_map(|p| p.trim().parse::<i32>().ok())
                            .sum::<i32>()
                    })
                    .filter(|b| *b > 0)
                    .unwrap_or(4)
            }
            "beat-type" => ts.beat_type = parse_i32(&child).unwrap_or(4),
            _ => {}
        }
    }
    ts
}

// ─── Note ────────────────────────────────────────────────────────────

fn parse_note(node: &Node) -> Note {
    let mut note = Note::default();

    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "pitch" => note.pitch = Some(parse_pitch(&child)),
            "duration" => note.duration = parse_i32(&child).unwrap_or(0),
            "voice" => note.voice = parse_i32(&child),
            "staff" => note.staff = parse_i32(&child),
            "rest" => note.rest = true,
            "grace" => note.grace = true,
            "chord" => note.chord = true,
            "tie" => match child.attribute("type") {
                Some("start") => note.tie_start = true,
                Some("stop") => note.tie_stop = true,
                _ => {}
            },
            "notations" => parse_notations(&child, &mut note),
            _ => {}
        }
    }

    note
}

fn parse_notations(node: &Node, note: &mut Note) {
    for nc in node.children().filter(|n| n.is_element()) {
        match nc.tag_name().name() {
            "fermata" => note.fermata = true,
            // <tied> mirrors <tie>; some exporters only write one of them
            "tied" => match nc.attribute("type") {
                Some("start") => note.tie_start = true,
                Some("stop") => note.tie_stop = true,
                _ => {}
            },
            "slur" => {
                if nc.attribute("type") == Some("stop") {
                    note.slur_stop = true;
                }
            }
            "articulations" => {
                if nc.children().any(|a| {
                    a.is_element()
                        && matches!(a.tag_name().name(), "breath-mark" | "caesura")
                }) {
                    note.breath_mark = true;
                }
            }
            _ => {}
        }
    }
}

fn parse_pitch(node: &Node) -> Pitch {
    let mut pitch = Pitch::new("C", 4, None);
    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "step" => pitch.step = text_of(&child).unwrap_or_else(|| "C".to_string()),
            "octave" => pitch.octave = parse_i32(&child).unwrap_or(4),
            "alter" => pitch.alter = parse_f64(&child),
            _ => {}
        }
    }
    pitch
}

// ─── Barline ─────────────────────────────────────────────────────────

fn parse_barline(node: &Node) -> Barline {
    let mut barline = Barline {
        location: node.attribute("location").unwrap_or("right").to_string(),
        ..Barline::default()
    };

    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "bar-style" => barline.bar_style = text_of(&child),
            "repeat" => {
                let direction = child
                    .attribute("direction")
                    .unwrap_or("forward")
                    .to_string();
                barline.repeat = Some(Repeat { direction });
            }
            "ending" => {
                barline.ending = Some(Ending {
                    number: child.attribute("number").unwrap_or("1").to_string(),
                    ending_type: child.attribute("type").unwrap_or("start").to_string(),
                });
            }
            _ => {}
        }
    }

    barline
}

// ─── Direction ───────────────────────────────────────────────────────

fn parse_direction(node: &Node) -> Option<Direction> {
    let mut dir = Direction::default();

    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "direction-type" => {
                for dt_child in child.children().filter(|n| n.is_element()) {
                    match dt_child.tag_name().name() {
                        "metronome" => dir.metronome = parse_metronome(&dt_child),
                        "words" => {
                            if let Some(text) = text_of(&dt_child) {
                                // Several <words> in one direction are joined
                                dir.words = Some(match dir.words.take() {
                                    Some(prev) => format!("{prev} {text}"),
                                    None => text,
                                });
                            }
                        }
                        "segno" => dir.segno = true,
                        "coda" => dir.coda = true,
                        _ => {}
                    }
                }
            }
            "sound" => apply_sound(&child, &mut dir),
            _ => {}
        }
    }

    has_content(&dir).then_some(dir)
}

fn apply_sound(node: &Node, dir: &mut Direction) {
    if let Some(tempo) = node.attribute("tempo").and_then(|t| t.trim().parse::<f64>().ok()) {
        dir.sound_tempo = Some(tempo);
    }
    if node.attribute("dacapo") == Some("yes") {
        dir.sound_dacapo = true;
    }
    if node.attribute("dalsegno").is_some() {
        dir.sound_dalsegno = true;
    }
    if node.attribute("fine").is_some() {
        dir.sound_fine = true;
    }
    if node.attribute("tocoda").is_some() {
        dir.sound_tocoda = true;
    }
    // <sound segno/coda> mark the jump destinations
    if node.attribute("segno").is_some() {
        dir.segno = true;
    }
    if node.attribute("coda").is_some() {
        dir.coda = true;
    }
}

fn has_content(dir: &Direction) -> bool {
    dir.sound_tempo.is_some()
        || dir.metronome.is_some()
        || dir.words.is_some()
        || dir.segno
        || dir.coda
        || dir.sound_dacapo
        || dir.sound_dalsegno
        || dir.sound_fine
        || dir.sound_tocoda
}

fn parse_metronome(node: &Node) -> Option<MetronomeMark> {
    let mut beat_unit = "quarter".to_string();
    let mut per_minute = None;
    let mut dotted = false;

    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "beat-unit" => {
                beat_unit = text_of(&child).unwrap_or_else(|| "quarter".to_string());
            }
            "beat-unit-dot" => dotted = true,
            "per-minute" => {
                // Tolerate "c. 96" and similar approximations
                per_minute = child.text().and_then(|t| {
                    t.trim()
                        .trim_start_matches(|c: char| !c.is_ascii_digit())
                        .parse::<f64>()
                        .ok()
                });
            }
            _ => {}
        }
    }

    per_minute.map(|per_minute| MetronomeMark {
        beat_unit,
        per_minute,
        dotted,
    })
}

// ─── Helpers ─────────────────────────────────────────────────────────

fn text_of(node: &Node) -> Option<String> {
    node.text()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

fn parse_i32(node: &Node) -> Option<i32> {
    node.text()?.trim().parse().ok()
}

fn parse_f64(node: &Node) -> Option<f64> {
    node.text()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE score-partwise PUBLIC "-//Recordare//DTD MusicXML 3.1 Partwise//EN" "http://www.musicxml.org/dtds/partwise.dtd">
<score-partwise version="3.1">
  <work><work-title>Etude</work-title></work>
  <identification><creator type="composer">Anon</creator></identification>
  <part-list><score-part id="P1"><part-name>Piano</part-name></score-part></part-list>
  <part id="P1">
    <measure number="1">
      <attributes><divisions>2</divisions><time><beats>3</beats><beat-type>4</beat-type></time></attributes>
      <direction placement="above">
        <direction-type><metronome><beat-unit>quarter</beat-unit><per-minute>96</per-minute></metronome></direction-type>
        <sound tempo="96"/>
      </direction>
      <note><pitch><step>C</step><octave>4</octave></pitch><duration>2</duration><voice>1</voice>
        <tie type="start"/><notations><tied type="start"/><fermata/></notations></note>
      <note><chord/><pitch><step>E</step><alter>-1</alter><octave>4</octave></pitch><duration>2</duration></note>
      <note><grace/><pitch><step>D</step><octave>4</octave></pitch></note>
      <note><rest/><duration>4</duration></note>
      <barline location="right"><bar-style>light-heavy</bar-style><repeat direction="backward"/></barline>
    </measure>
  </part>
</score-partwise>"#;

    #[test]
    fn parses_header_and_part() {
        let score = parse_musicxml(MINIMAL).unwrap();
        assert_eq!(score.title.as_deref(), Some("Etude"));
        assert_eq!(score.composer.as_deref(), Some("Anon"));
        assert_eq!(score.version.as_deref(), Some("3.1"));
        assert_eq!(score.parts.len(), 1);
        assert_eq!(score.parts[0].name, "Piano");
        assert_eq!(score.measure_count(), 1);
    }

    #[test]
    fn parses_notes_and_flags() {
        let score = parse_musicxml(MINIMAL).unwrap();
        let m = &score.parts[0].measures[0];
        assert_eq!(m.notes.len(), 4);

        let c = &m.notes[0];
        assert_eq!(c.midi_value(), Some(60));
        assert!(c.tie_start && c.fermata && !c.tie_stop);

        let e_flat = &m.notes[1];
        assert!(e_flat.chord);
        assert_eq!(e_flat.midi_value(), Some(63));

        assert!(m.notes[2].grace);
        assert!(m.notes[3].rest);
        assert_eq!(m.notes[3].duration, 4);
    }

    #[test]
    fn parses_attributes_barlines_and_tempo() {
        let score = parse_musicxml(MINIMAL).unwrap();
        let m = &score.parts[0].measures[0];
        let attrs = m.attributes.as_ref().unwrap();
        assert_eq!(attrs.divisions, Some(2));
        assert_eq!(attrs.time, Some(TimeSignature { beats: 3, beat_type: 4 }));

        assert!(m.barlines[0].is_backward_repeat());
        assert!(m.barlines[0].is_sectional());

        let dir = &m.directions[0];
        assert_eq!(dir.sound_tempo, Some(96.0));
        assert_eq!(dir.metronome.as_ref().map(|mm| mm.per_minute), Some(96.0));
    }

    #[test]
    fn rejects_timewise_scores() {
        let xml = r#"<score-timewise version="3.1"></score-timewise>"#;
        match parse_musicxml(xml) {
            Err(PracticeError::UnsupportedDocument(root)) => assert_eq!(root, "score-timewise"),
            other => panic!("expected UnsupportedDocument, got {other:?}"),
        }
    }

    #[test]
    fn reports_malformed_xml() {
        assert!(matches!(
            parse_musicxml("<score-partwise>"),
            Err(PracticeError::Xml(_))
        ));
    }

    #[test]
    fn bare_sound_navigation_becomes_direction() {
        let xml = r#"<score-partwise>
  <part-list><score-part id="P1"/></part-list>
  <part id="P1"><measure number="1">
    <note><rest/><duration>4</duration></note>
    <sound dacapo="yes"/>
  </measure></part>
</score-partwise>"#;
        let score = parse_musicxml(xml).unwrap();
        assert!(score.parts[0].measures[0].directions[0].sound_dacapo);
    }
}
