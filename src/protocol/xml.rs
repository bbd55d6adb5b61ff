//! OAI-PMH response parsing (quick-xml)
//!
//! Every verb response is scanned by the same event loop; the public
//! functions pick the parts that belong to their verb. Element matching uses
//! local names so namespace prefixes chosen by the repository do not matter.

use super::{Page, Record, RecordHeader, ResumptionToken};
use crate::error::{Error, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

/// Declaration prepended to extracted metadata documents
pub const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

/// Protocol error code meaning "the listing is empty"
const NO_RECORDS_MATCH: &str = "noRecordsMatch";

#[derive(Debug, Default)]
struct Scan {
    saw_root: bool,
    error: Option<(String, String)>,
    headers: Vec<RecordHeader>,
    records: Vec<Record>,
    sets: Vec<String>,
    token: Option<ResumptionToken>,
    complete_list_size: Option<u64>,
}

/// Parse a `ListSets` response into set specs
pub fn parse_list_sets(xml: &str) -> Result<Page<String>> {
    let Some(scan) = scan_listing(xml)? else {
        return Ok(Page::empty());
    };
    Ok(Page {
        items: scan.sets,
        resumption: scan.token,
        complete_list_size: scan.complete_list_size,
    })
}

/// Parse a `ListRecords` response
pub fn parse_list_records(xml: &str) -> Result<Page<Record>> {
    let Some(scan) = scan_listing(xml)? else {
        return Ok(Page::empty());
    };
    Ok(Page {
        items: scan.records,
        resumption: scan.token,
        complete_list_size: scan.complete_list_size,
    })
}

/// Parse a `ListIdentifiers` response
pub fn parse_list_identifiers(xml: &str) -> Result<Page<RecordHeader>> {
    let Some(scan) = scan_listing(xml)? else {
        return Ok(Page::empty());
    };
    Ok(Page {
        items: scan.headers,
        resumption: scan.token,
        complete_list_size: scan.complete_list_size,
    })
}

/// Parse a `GetRecord` response
pub fn parse_get_record(xml: &str) -> Result<Record> {
    let mut scan = scan(xml)?;
    if let Some((code, message)) = scan.error.take() {
        return Err(Error::Protocol { code, message });
    }
    scan.records
        .into_iter()
        .next()
        .ok_or_else(|| Error::Parse("GetRecord response without a record".to_string()))
}

/// Scan a listing; `None` means the repository reported an empty result
fn scan_listing(xml: &str) -> Result<Option<Scan>> {
    let mut scan = scan(xml)?;
    match scan.error.take() {
        Some((code, _)) if code == NO_RECORDS_MATCH => Ok(None),
        Some((code, message)) => Err(Error::Protocol { code, message }),
        None => Ok(Some(scan)),
    }
}

fn scan(xml: &str) -> Result<Scan> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut out = Scan::default();
    let mut path: Vec<Vec<u8>> = Vec::new();
    let mut header: Option<RecordHeader> = None;
    let mut record: Option<Record> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.local_name().as_ref().to_vec();
                match name.as_slice() {
                    b"OAI-PMH" => out.saw_root = true,
                    b"record" => record = Some(Record::default()),
                    b"header" => header = Some(start_header(&e)?),
                    b"metadata" if record.is_some() => {
                        let end = e.to_end().into_owned();
                        let span = reader.read_to_end(end.name())?;
                        let inner = xml
                            .get(span.start as usize..span.end as usize)
                            .ok_or_else(|| Error::Parse("metadata span out of range".into()))?;
                        if let Some(r) = record.as_mut() {
                            r.metadata = Some(format!("{XML_DECLARATION}\n{}", inner.trim()));
                        }
                        // end tag already consumed
                        continue;
                    }
                    b"resumptionToken" => {
                        let token = start_token(&e)?;
                        out.complete_list_size = token.complete_list_size;
                        out.token = Some(token);
                    }
                    b"error" => {
                        out.error = Some((attribute(&e, "code")?.unwrap_or_default(), String::new()))
                    }
                    _ => {}
                }
                path.push(name);
            }
            Event::Empty(e) => match e.local_name().as_ref() {
                b"OAI-PMH" => out.saw_root = true,
                // an empty token marks the last page; its size hint still counts
                b"resumptionToken" => {
                    out.complete_list_size = start_token(&e)?.complete_list_size;
                    out.token = None;
                }
                b"error" => {
                    out.error = Some((attribute(&e, "code")?.unwrap_or_default(), String::new()))
                }
                b"header" => {
                    let h = start_header(&e)?;
                    finish_header(h, record.as_mut(), &mut out.headers);
                }
                _ => {}
            },
            Event::Text(t) => {
                let text = t.unescape()?.into_owned();
                apply_text(&path, text, header.as_mut(), &mut out);
            }
            Event::CData(c) => {
                let text = String::from_utf8_lossy(&c.into_inner()).into_owned();
                apply_text(&path, text, header.as_mut(), &mut out);
            }
            Event::End(e) => {
                path.pop();
                match e.local_name().as_ref() {
                    b"header" => {
                        if let Some(h) = header.take() {
                            finish_header(h, record.as_mut(), &mut out.headers);
                        }
                    }
                    b"record" => {
                        if let Some(r) = record.take() {
                            out.records.push(r);
                        }
                    }
                    b"resumptionToken" => {
                        if out.token.as_ref().is_some_and(|t| t.value.trim().is_empty()) {
                            out.token = None;
                        }
                    }
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !out.saw_root {
        return Err(Error::Parse("response is not an OAI-PMH document".to_string()));
    }
    Ok(out)
}

fn apply_text(path: &[Vec<u8>], text: String, header: Option<&mut RecordHeader>, out: &mut Scan) {
    let Some(current) = path.last() else {
        return;
    };
    let parent = path.len().checked_sub(2).and_then(|i| path.get(i));
    match (current.as_slice(), parent.map(Vec::as_slice)) {
        (b"identifier", Some(b"header")) => {
            if let Some(h) = header {
                h.identifier = text.trim().to_string();
            }
        }
        (b"datestamp", Some(b"header")) => {
            if let Some(h) = header {
                h.datestamp = Some(text.trim().to_string());
            }
        }
        (b"setSpec", Some(b"header")) => {
            if let Some(h) = header {
                h.set_specs.push(text.trim().to_string());
            }
        }
        (b"setSpec", Some(b"set")) => out.sets.push(text.trim().to_string()),
        (b"resumptionToken", _) => {
            if let Some(token) = out.token.as_mut() {
                token.value.push_str(text.trim());
            }
        }
        (b"error", _) => {
            if let Some((_, message)) = out.error.as_mut() {
                message.push_str(&text);
            }
        }
        _ => {}
    }
}

fn finish_header(h: RecordHeader, record: Option<&mut Record>, headers: &mut Vec<RecordHeader>) {
    match record {
        Some(r) => r.header = h,
        None => headers.push(h),
    }
}

fn start_header(e: &BytesStart<'_>) -> Result<RecordHeader> {
    Ok(RecordHeader {
        deleted: attribute(e, "status")?.is_some_and(|s| s == "deleted"),
        ..RecordHeader::default()
    })
}

fn start_token(e: &BytesStart<'_>) -> Result<ResumptionToken> {
    Ok(ResumptionToken {
        value: String::new(),
        complete_list_size: attribute(e, "completeListSize")?.and_then(|v| v.trim().parse().ok()),
        cursor: attribute(e, "cursor")?.and_then(|v| v.trim().parse().ok()),
        expiration: attribute(e, "expirationDate")?,
    })
}

fn attribute(e: &BytesStart<'_>, name: &str) -> Result<Option<String>> {
    let attr = e
        .try_get_attribute(name)
        .map_err(|err| Error::Parse(format!("bad attribute {name}: {err}")))?;
    match attr {
        Some(a) => Ok(Some(a.unescape_value()?.into_owned())),
        None => Ok(None),
    }
}
