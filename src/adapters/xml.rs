//! Small XML scanning helpers shared by the vote and Hansard adapters.
//!
//! Upstream feeds are parsed element-by-element rather than via a single
//! whole-document `Deserialize`, since the wrapping root tag differs
//! between feeds and callers only ever care about one repeated child
//! element.

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::IngestError;

/// Return the raw UTF-8 text of every top-level element named `tag`
/// (depth-one matches only; nested same-named elements are not supported,
/// which is sufficient for the flat vote-list and paragraph feeds this
/// crate consumes).
pub fn extract_elements(xml: &[u8], tag: &str) -> Result<Vec<String>, IngestError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut out = Vec::new();
    let mut depth: u32 = 0;
    let mut capture_start: Option<usize> = None;
    let mut buf = Vec::new();

    loop {
        let pos_before = reader.buffer_position() as usize;
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if e.name().as_ref() == tag.as_bytes() && depth == 1 {
                    capture_start = Some(pos_before);
                }
                depth += 1;
            }
            Ok(Event::Empty(e)) => {
                if e.name().as_ref() == tag.as_bytes() && depth == 1 {
                    let pos_after = reader.buffer_position() as usize;
                    out.push(String::from_utf8_lossy(&xml[pos_before..pos_after]).into_owned());
                }
            }
            Ok(Event::End(e)) => {
                depth = depth.saturating_sub(1);
                if e.name().as_ref() == tag.as_bytes() && depth == 1 {
                    if let Some(start) = capture_start.take() {
                        let pos_after = reader.buffer_position() as usize;
                        out.push(String::from_utf8_lossy(&xml[start..pos_after]).into_owned());
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(err) => return Err(IngestError::Xml(err.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(out)
}

/// `(total, with_id)` counts of `<tag ...>` elements, used for the Hansard
/// "do almost all paragraphs have an id" gate.
pub fn count_elements_with_attribute(
    xml: &[u8],
    tag: &str,
    attribute: &str,
) -> Result<(usize, usize), IngestError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut total = 0usize;
    let mut with_attr = 0usize;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if e.name().as_ref() == tag.as_bytes() {
                    total += 1;
                    let has_attr = e
                        .attributes()
                        .flatten()
                        .any(|attr| attr.key.as_ref() == attribute.as_bytes());
                    if has_attr {
                        with_attr += 1;
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(err) => return Err(IngestError::Xml(err.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok((total, with_attr))
}

/// The root element's `id` attribute, if present.
pub fn root_id_attribute(xml: &[u8]) -> Result<Option<String>, IngestError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                for attr in e.attributes().flatten() {
                    if attr.key.as_ref() == b"id" {
                        return Ok(Some(
                            String::from_utf8_lossy(&attr.value).into_owned(),
                        ));
                    }
                }
                return Ok(None);
            }
            Ok(Event::Eof) => return Ok(None),
            Err(err) => return Err(IngestError::Xml(err.to_string())),
            _ => {}
        }
        buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_elements_pulls_out_each_matching_child() {
        let xml = b"<VoteList><Vote><A>1</A></Vote><Vote><A>2</A></Vote></VoteList>";
        let votes = extract_elements(xml, "Vote").unwrap();
        assert_eq!(votes.len(), 2);
        assert!(votes[0].contains("<A>1</A>"));
    }

    #[test]
    fn count_elements_with_attribute_tracks_coverage() {
        let xml = br#"<Doc><ParaText id="1">a</ParaText><ParaText>b</ParaText></Doc>"#;
        let (total, with_id) = count_elements_with_attribute(xml, "ParaText", "id").unwrap();
        assert_eq!(total, 2);
        assert_eq!(with_id, 1);
    }

    #[test]
    fn root_id_attribute_reads_the_outermost_tag() {
        let xml = br#"<Document id="42"><Body/></Document>"#;
        assert_eq!(root_id_attribute(xml).unwrap(), Some("42".to_string()));
    }
}
