//! Request bodies are decoded one field at a time so that a single bad field still lets the
//! others be echoed back.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use chipflow_core::error::PipelineError;
use chipflow_runtime::detect::SegmentRequest;
use chipflow_runtime::tile::TileRequest;

struct Fields<'a> {
    object: Option<&'a Map<String, Value>>,
    invalid: Vec<String>,
}

impl<'a> Fields<'a> {
    fn new(body: &'a Value) -> Self {
        Self {
            object: body.as_object(),
            invalid: Vec::new(),
        }
    }

    /// `null` and absent fields both decode to `None`.
    fn take<T: DeserializeOwned>(&mut self, name: &str) -> Option<T> {
        let value = self.object?.get(name)?;
        if value.is_null() {
            return None;
        }
        match serde_json::from_value(value.clone()) {
            Ok(v) => Some(v),
            Err(e) => {
                self.invalid.push(format!("{name}: {e}"));
                None
            }
        }
    }

    fn finish(self) -> Option<PipelineError> {
        if self.object.is_none() {
            return Some(PipelineError::invalid(
                "malformed request body: expected a JSON object",
            ));
        }
        if self.invalid.is_empty() {
            return None;
        }
        Some(PipelineError::invalid(format!(
            "malformed request body: {}",
            self.invalid.join("; ")
        )))
    }
}

pub fn segment_request(body: &Value) -> (SegmentRequest, Option<PipelineError>) {
    let mut fields = Fields::new(body);
    let request = SegmentRequest {
        cx: fields.take("cx"),
        cy: fields.take("cy"),
        acquired: fields.take("acquired"),
        n: fields.take("n"),
    };
    (request, fields.finish())
}

pub fn tile_request(body: &Value) -> (TileRequest, Option<PipelineError>) {
    let mut fields = Fields::new(body);
    let request = TileRequest {
        tx: fields.take("tx"),
        ty: fields.take("ty"),
        chips: fields.take("chips"),
        date: fields.take("date"),
    };
    (request, fields.finish())
}
