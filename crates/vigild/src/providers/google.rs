use super::{checked, malformed};
use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::json;
use vigil_core::{BoundingBox, DescriptorProvider, FaceDescriptor, ProviderError};

const DEFAULT_ENDPOINT: &str = "https://vision.googleapis.com";

/// Google Cloud Vision `images:annotate` with face detection.
pub struct GoogleVisionProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct AnnotateResponse {
    #[serde(default)]
    responses: Vec<AnnotateResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnnotateResult {
    #[serde(default)]
    face_annotations: Vec<FaceAnnotation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FaceAnnotation {
    bounding_poly: BoundingPoly,
    #[serde(default)]
    detection_confidence: f32,
}

#[derive(Debug, Deserialize)]
struct BoundingPoly {
    vertices: Vec<Vertex>,
}

/// Vision omits zero coordinates.
#[derive(Debug, Default, Clone, Copy, Deserialize)]
struct Vertex {
    #[serde(default)]
    x: f32,
    #[serde(default)]
    y: f32,
}

impl GoogleVisionProvider {
    pub fn new(client: reqwest::Client, endpoint: Option<String>, api_key: String) -> Self {
        let endpoint = endpoint.unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

fn parse_response(body: &[u8]) -> Result<FaceDescriptor, ProviderError> {
    let response: AnnotateResponse = serde_json::from_slice(body).map_err(malformed)?;
    let face = response
        .responses
        .into_iter()
        .next()
        .and_then(|r| r.face_annotations.into_iter().next())
        .ok_or(ProviderError::NoFaceDetected)?;

    // Vertices run clockwise from the top-left corner.
    let vertices = &face.bounding_poly.vertices;
    let (top_left, bottom_right) = match (vertices.first(), vertices.get(2)) {
        (Some(a), Some(c)) => (*a, *c),
        _ => return Err(ProviderError::Unavailable("bounding polygon has fewer than 3 vertices".into())),
    };

    Ok(FaceDescriptor::new(
        Vec::new(),
        face.detection_confidence,
        BoundingBox {
            x: top_left.x,
            y: top_left.y,
            width: bottom_right.x - top_left.x,
            height: bottom_right.y - top_left.y,
        },
    ))
}

#[async_trait]
impl DescriptorProvider for GoogleVisionProvider {
    fn name(&self) -> &str {
        "google"
    }

    async fn extract(&self, image: &[u8]) -> Result<FaceDescriptor, ProviderError> {
        let request = json!({
            "requests": [{
                "image": { "content": base64::engine::general_purpose::STANDARD.encode(image) },
                "features": [{ "type": "FACE_DETECTION", "maxResults": 1 }],
            }]
        });
        let response = self
            .client
            .post(format!("{}/v1/images:annotate", self.endpoint))
            .query(&[("key", &self.api_key)])
            .json(&request)
            .send()
            .await;
        let body = checked(response)
            .await?
            .bytes()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;
        parse_response(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_face_annotation() {
        let body = br#"{"responses": [{"faceAnnotations": [{
            "boundingPoly": {"vertices": [{"x": 10, "y": 20}, {"x": 110, "y": 20}, {"x": 110, "y": 160}, {"x": 10, "y": 160}]},
            "detectionConfidence": 0.87
        }]}]}"#;
        let d = parse_response(body).unwrap();
        assert!(d.encoding.is_empty());
        assert_eq!(d.confidence, 0.87);
        assert_eq!(d.bounding_box.x, 10.0);
        assert_eq!(d.bounding_box.width, 100.0);
        assert_eq!(d.bounding_box.height, 140.0);
    }

    #[test]
    fn test_parse_missing_zero_coordinates() {
        let body = br#"{"responses": [{"faceAnnotations": [{
            "boundingPoly": {"vertices": [{}, {"x": 50}, {"x": 50, "y": 60}, {"y": 60}]},
            "detectionConfidence": 0.5
        }]}]}"#;
        let d = parse_response(body).unwrap();
        assert_eq!(d.bounding_box.x, 0.0);
        assert_eq!(d.bounding_box.height, 60.0);
    }

    #[test]
    fn test_parse_no_faces() {
        assert!(matches!(parse_response(br#"{"responses": [{}]}"#), Err(ProviderError::NoFaceDetected)));
        assert!(matches!(parse_response(br#"{}"#), Err(ProviderError::NoFaceDetected)));
    }
}
