use bytes::BytesMut;
use std::io;
use tokio_util::codec::Decoder;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseMessage {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

/// Incremental `text/event-stream` decoder. Chunks may split lines anywhere;
/// a blank line dispatches the accumulated `data:` lines joined with `\n`.
#[derive(Debug, Default)]
pub struct SseCodec {
    data: Vec<String>,
    event: Option<String>,
    last_id: Option<String>,
}

impl SseCodec {
    fn process_line(&mut self, line: &[u8]) -> Option<SseMessage> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line[0] == b':' {
            return None;
        }

        let text = String::from_utf8_lossy(line);
        let (field, value) = match text.find(':') {
            Some(idx) => {
                let value = &text[idx + 1..];
                (&text[..idx], value.strip_prefix(' ').unwrap_or(value))
            }
            None => (text.as_ref(), ""),
        };

        match field {
            "data" => self.data.push(value.to_string()),
            "event" => self.event = Some(value.to_string()),
            "id" => self.last_id = Some(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseMessage> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }

        let data = self.data.join("\n");
        self.data.clear();
        Some(SseMessage {
            event,
            data,
            id: self.last_id.clone(),
        })
    }
}

fn strip_cr(line: &[u8]) -> &[u8] {
    match line.last() {
        Some(b'\r') => &line[..line.len() - 1],
        _ => line,
    }
}

impl Decoder for SseCodec {
    type Item = SseMessage;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        while let Some(pos) = src.iter().position(|b| *b == b'\n') {
            let line = src.split_to(pos + 1);
            if let Some(message) = self.process_line(strip_cr(&line[..pos])) {
                return Ok(Some(message));
            }
        }
        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(message) = self.decode(src)? {
            return Ok(Some(message));
        }
        if !src.is_empty() {
            let rest = src.split_to(src.len());
            if let Some(message) = self.process_line(strip_cr(&rest)) {
                return Ok(Some(message));
            }
        }
        // A message without its terminating blank line is incomplete and discarded.
        self.data.clear();
        self.event = None;
        Ok(None)
    }
}
