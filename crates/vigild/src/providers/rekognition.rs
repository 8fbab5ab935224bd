use super::{checked, malformed};
use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::json;
use vigil_core::{BoundingBox, DescriptorProvider, FaceDescriptor, ProviderError};

/// Rekognition boxes are image ratios; scale onto a nominal 1000px frame.
const FRAME_SCALE: f32 = 1000.0;

/// AWS Rekognition `DetectFaces`.
///
/// `api_key` is passed through as a pre-signed `Authorization` value.
pub struct RekognitionProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DetectFacesResponse {
    #[serde(default)]
    face_details: Vec<FaceDetail>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FaceDetail {
    bounding_box: RatioBox,
    /// Percentage, 0-100.
    confidence: f32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RatioBox {
    left: f32,
    top: f32,
    width: f32,
    height: f32,
}

impl RekognitionProvider {
    pub fn new(client: reqwest::Client, endpoint: String, api_key: String) -> Self {
        Self {
            client,
            endpoint,
            api_key,
        }
    }
}

fn parse_response(body: &[u8]) -> Result<FaceDescriptor, ProviderError> {
    let response: DetectFacesResponse = serde_json::from_slice(body).map_err(malformed)?;
    let face = response
        .face_details
        .into_iter()
        .next()
        .ok_or(ProviderError::NoFaceDetected)?;
    let b = face.bounding_box;
    Ok(FaceDescriptor::new(
        Vec::new(),
        face.confidence / 100.0,
        BoundingBox {
            x: b.left * FRAME_SCALE,
            y: b.top * FRAME_SCALE,
            width: b.width * FRAME_SCALE,
            height: b.height * FRAME_SCALE,
        },
    ))
}

#[async_trait]
impl DescriptorProvider for RekognitionProvider {
    fn name(&self) -> &str {
        "rekognition"
    }

    async fn extract(&self, image: &[u8]) -> Result<FaceDescriptor, ProviderError> {
        let request = json!({
            "Image": { "Bytes": base64::engine::general_purpose::STANDARD.encode(image) },
            "Attributes": ["DEFAULT"],
        });
        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/x-amz-json-1.1")
            .header("X-Amz-Target", "RekognitionService.DetectFaces")
            .header("Authorization", &self.api_key)
            .body(request.to_string())
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
