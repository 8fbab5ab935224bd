use super::{checked, malformed};
use async_trait::async_trait;
use serde::Deserialize;
use vigil_core::{BoundingBox, DescriptorProvider, FaceDescriptor, ProviderError};

/// Azure reports no per-face confidence for detection.
const AZURE_CONFIDENCE: f32 = 0.95;

/// Azure Face API `detect` endpoint.
pub struct AzureProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DetectedFace {
    face_rectangle: FaceRectangle,
}

#[derive(Debug, Deserialize)]
struct FaceRectangle {
    left: f32,
    top: f32,
    width: f32,
    height: f32,
}

impl AzureProvider {
    pub fn new(client: reqwest::Client, endpoint: String, api_key: String) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

fn parse_response(body: &[u8]) -> Result<FaceDescriptor, ProviderError> {
    let faces: Vec<DetectedFace> = serde_json::from_slice(body).map_err(malformed)?;
    let face = faces.into_iter().next().ok_or(ProviderError::NoFaceDetected)?;
    let r = face.face_rectangle;
    Ok(FaceDescriptor::new(
        Vec::new(),
        AZURE_CONFIDENCE,
        BoundingBox {
            x: r.left,
            y: r.top,
            width: r.width,
            height: r.height,
        },
    ))
}

#[async_trait]
impl DescriptorProvider for AzureProvider {
    fn name(&self) -> &str {
        "azure"
    }

    async fn extract(&self, image: &[u8]) -> Result<FaceDescriptor, ProviderError> {
        let response = self
            .client
            .post(format!("{}/face/v1.0/detect", self.endpoint))
            .query(&[
                ("returnFaceId", "false"),
                ("recognitionModel", "recognition_04"),
                ("detectionModel", "detection_03"),
            ])
            .header("Ocp-Apim-Subscription-Key", &self.api_key)
            .header("Content-Type", "application/octet-stream")
            .body(image.to_vec())
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
    fn test_parse_first_face() {
        let body = br#"[
            {"faceId": "c5c24a82", "faceRectangle": {"top": 131, "left": 177, "width": 162, "height": 162}},
            {"faceId": "65d083d4", "faceRectangle": {"top": 10, "left": 20, "width": 30, "height": 40}}
        ]"#;
        let d = parse_response(body).unwrap();
        assert!(d.encoding.is_empty());
        assert!(!d.is_comparable());
        assert_eq!(d.confidence, 0.95);
        assert_eq!(d.bounding_box.x, 177.0);
        assert_eq!(d.bounding_box.y, 131.0);
        assert_eq!(d.bounding_box.width, 162.0);
    }

    #[test]
    fn test_parse_no_faces() {
        assert!(matches!(parse_response(b"[]"), Err(ProviderError::NoFaceDetected)));
    }

    #[test]
    fn test_parse_malformed() {
        assert!(matches!(
            parse_response(br#"{"error": {"code": "401"}}"#),
            Err(ProviderError::Unavailable(_))
        ));
    }
}
