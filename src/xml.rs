//! Blob service XML payloads.
//!
//! The blob REST API speaks XML in two places this crate cares about: the
//! `<BlockList>` body of Put Block List, and the `<EnumerationResults>`
//! document returned by List Blobs.  Both are handled with `quick-xml`.

use chrono::{DateTime, Utc};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::collections::HashMap;
use std::io::Cursor;

use crate::storage::backend::{BlobItem, BlobProperties};

// ── BlockList ───────────────────────────────────────────────────────

/// Render the Put Block List body.  Every id is emitted as `<Latest>` so
/// the service resolves it against uncommitted blocks first and committed
/// blocks second, which keeps a repeated commit of the same list valid.
///
/// ```xml
/// <?xml version="1.0" encoding="utf-8"?>
/// <BlockList>
///   <Latest>MDAwMDAw</Latest>
/// </BlockList>
/// ```
pub fn render_block_list(block_ids: &[String]) -> String {
    let mut writer = Writer::new(Cursor::new(Vec::new()));

    writer
        .write_event(Event::Decl(quick_xml::events::BytesDecl::new(
            "1.0",
            Some("utf-8"),
            None,
        )))
        .expect("xml decl");
    writer
        .write_event(Event::Start(BytesStart::new("BlockList")))
        .expect("start BlockList");
    for id in block_ids {
        write_text_element(&mut writer, "Latest", id);
    }
    writer
        .write_event(Event::End(BytesEnd::new("BlockList")))
        .expect("end BlockList");

    String::from_utf8(writer.into_inner().into_inner()).expect("valid utf-8")
}

fn write_text_element(writer: &mut Writer<Cursor<Vec<u8>>>, tag: &str, value: &str) {
    writer
        .write_event(Event::Start(BytesStart::new(tag)))
        .expect("start tag");
    writer
        .write_event(Event::Text(BytesText::new(value)))
        .expect("text");
    writer
        .write_event(Event::End(BytesEnd::new(tag)))
        .expect("end tag");
}

// ── EnumerationResults ──────────────────────────────────────────────

/// One page of a List Blobs response.
#[derive(Debug, Default)]
pub struct BlobListPage {
    pub items: Vec<BlobItem>,
    /// Continuation marker; `None` on the last page.
    pub next_marker: Option<String>,
}

/// Parse a List Blobs `<EnumerationResults>` document.
///
/// Only the fields surfaced in [`BlobProperties`] are extracted; unknown
/// elements are skipped.
pub fn parse_blob_list(body: &str) -> Result<BlobListPage, String> {
    let mut reader = Reader::from_str(body);
    reader.trim_text(true);

    let mut page = BlobListPage::default();
    let mut path: Vec<String> = Vec::new();
    let mut current: Option<BlobItem> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if tag == "Blob" && parent_is(&path, "Blobs") {
                    current = Some(BlobItem {
                        name: String::new(),
                        properties: BlobProperties::default(),
                    });
                }
                path.push(tag);
            }
            Ok(Event::End(_)) => {
                if let Some(tag) = path.pop() {
                    if tag == "Blob" {
                        if let Some(item) = current.take() {
                            page.items.push(item);
                        }
                    }
                }
            }
            Ok(Event::Text(ref e)) => {
                let text = e.unescape().map_err(|e| e.to_string())?.into_owned();
                apply_text(&path, &text, current.as_mut(), &mut page);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("malformed blob listing at {}: {e}", reader.buffer_position())),
            _ => {}
        }
    }

    Ok(page)
}

fn parent_is(path: &[String], name: &str) -> bool {
    path.last().is_some_and(|p| p == name)
}

fn apply_text(path: &[String], text: &str, current: Option<&mut BlobItem>, page: &mut BlobListPage) {
    let Some(tag) = path.last().map(String::as_str) else {
        return;
    };

    if tag == "NextMarker" && path.len() == 2 {
        if !text.is_empty() {
            page.next_marker = Some(text.to_string());
        }
        return;
    }

    let Some(item) = current else {
        return;
    };
    let parent = path
        .len()
        .checked_sub(2)
        .and_then(|i| path.get(i))
        .map(String::as_str);

    match (parent, tag) {
        (Some("Blob"), "Name") => item.name = text.to_string(),
        (Some("Metadata"), key) => {
            item.properties
                .metadata
                .insert(key.to_string(), text.to_string());
        }
        (Some("Properties"), "Content-Type") => item.properties.content_type = text.to_string(),
        (Some("Properties"), "Content-Length") => {
            item.properties.content_length = text.parse().unwrap_or(0);
        }
        (Some("Properties"), "Content-MD5") => {
            item.properties.content_md5 = Some(text.to_string());
        }
        (Some("Properties"), "Creation-Time") => {
            item.properties.created_on = parse_http_date(text);
        }
        _ => {}
    }
}

/// Parse an RFC 1123 date as used by the blob service.
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    httpdate::parse_http_date(value).ok().map(DateTime::<Utc>::from)
}

/// Collect `x-ms-meta-*` headers into a metadata map keyed without the prefix.
pub fn metadata_from_headers(headers: &http::HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let key = name.as_str().strip_prefix("x-ms-meta-")?;
            Some((key.to_string(), value.to_str().ok()?.to_string()))
        })
        .collect()
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_block_list() {
        let ids = vec!["MDAwMDAw".to_string(), "MDAwMDAx".to_string()];
        let xml = render_block_list(&ids);
        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains("<BlockList><Latest>MDAwMDAw</Latest><Latest>MDAwMDAx</Latest></BlockList>"));
    }

    #[test]
    fn test_render_empty_block_list() {
        let xml = render_block_list(&[]);
        assert!(xml.contains("<BlockList></BlockList>"));
    }

    #[test]
    fn test_parse_blob_list() {
        let body = r#"<?xml version="1.0" encoding="utf-8"?>
<EnumerationResults ServiceEndpoint="https://acct.blob.core.windows.net/" ContainerName="uploads">
  <Prefix>video</Prefix>
  <Blobs>
    <Blob>
      <Name>video_20260301120000.mp4</Name>
      <Properties>
        <Creation-Time>Sun, 01 Mar 2026 12:00:00 GMT</Creation-Time>
        <Content-Length>12582912</Content-Length>
        <Content-Type>video/mp4</Content-Type>
        <Content-MD5>1B2M2Y8AsgTpgAmY7PhCfg==</Content-MD5>
      </Properties>
      <Metadata>
        <origin>chunked</origin>
      </Metadata>
    </Blob>
    <Blob>
      <Name>notes &amp; more.txt</Name>
      <Properties>
        <Content-Type>text/plain</Content-Type>
      </Properties>
      <Metadata />
    </Blob>
  </Blobs>
  <NextMarker>2!84!MDAwMDQ</NextMarker>
</EnumerationResults>"#;

        let page = parse_blob_list(body).unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.next_marker.as_deref(), Some("2!84!MDAwMDQ"));

        let first = &page.items[0];
        assert_eq!(first.name, "video_20260301120000.mp4");
        assert_eq!(first.properties.content_type, "video/mp4");
        assert_eq!(first.properties.content_length, 12_582_912);
        assert_eq!(
            first.properties.content_md5.as_deref(),
            Some("1B2M2Y8AsgTpgAmY7PhCfg==")
        );
        assert!(first.properties.created_on.is_some());
        assert_eq!(first.properties.metadata.get("origin").unwrap(), "chunked");

        let second = &page.items[1];
        assert_eq!(second.name, "notes & more.txt");
        assert!(second.properties.metadata.is_empty());
    }

    #[test]
    fn test_parse_blob_list_last_page() {
        let body = "<EnumerationResults><Blobs /><NextMarker /></EnumerationResults>";
        let page = parse_blob_list(body).unwrap();
        assert!(page.items.is_empty());
        assert!(page.next_marker.is_none());
    }

    #[test]
    fn test_metadata_from_headers() {
        let mut headers = http::HeaderMap::new();
        headers.insert("x-ms-meta-origin", "chunked".parse().unwrap());
        headers.insert("content-type", "video/mp4".parse().unwrap());
        let meta = metadata_from_headers(&headers);
        assert_eq!(meta.len(), 1);
        assert_eq!(meta.get("origin").unwrap(), "chunked");
    }
}
