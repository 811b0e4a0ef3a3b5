//! Scryfall-backed catalog.
//!
//! API calls are spaced by a fixed cooldown shared by every request this
//! client makes, as Scryfall asks of API consumers. Image downloads go to the
//! image CDN and are not throttled here; the background loader bounds their
//! concurrency instead.
//!
//! Printings are read from the `border_crop` image of a card, or of each face
//! for double-faced layouts. Meld cards carry no back image of their own; the
//! back is the meld result card's front, found with a follow-up search.

use std::collections::HashMap;

use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::{BoxFuture, Catalog};
use crate::card::{BackKind, CardPrinting};
use crate::config::EngineConfig;
use crate::error::CatalogError;

#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(default)]
    data: Vec<serde_json::Value>,
    #[serde(default)]
    has_more: bool,
    next_page: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NamesCatalog {
    data: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ImageUris {
    border_crop: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CardFace {
    name: Option<String>,
    image_uris: Option<ImageUris>,
}

#[derive(Debug, Deserialize)]
struct RelatedCard {
    component: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct ScryfallCard {
    name: String,
    set: String,
    lang: String,
    #[serde(default)]
    layout: Option<String>,
    image_uris: Option<ImageUris>,
    card_faces: Option<Vec<CardFace>>,
    all_parts: Option<Vec<RelatedCard>>,
}

/// A decoded card plus the meld result still to be looked up.
#[derive(Debug)]
struct DecodedCard {
    printing: CardPrinting,
    meld_result: Option<String>,
}

fn decode_card(card: ScryfallCard) -> Result<DecodedCard, String> {
    let border_crop =
        |uris: &Option<ImageUris>| uris.as_ref().and_then(|u| u.border_crop.clone());

    let printing = if let Some(front) = border_crop(&card.image_uris) {
        CardPrinting::single(&card.name, card.set.to_lowercase(), card.lang.to_lowercase(), front)
    } else if let Some(faces) = &card.card_faces {
        if faces.len() < 2 {
            return Err(format!("{}: expected two card faces", card.name));
        }
        let front = border_crop(&faces[0].image_uris)
            .ok_or_else(|| format!("{}: front face has no image", card.name))?;
        let back = border_crop(&faces[1].image_uris)
            .ok_or_else(|| format!("{}: back face has no image", card.name))?;
        let back_name = faces[1].name.clone().unwrap_or_else(|| card.name.clone());
        CardPrinting::single(&card.name, card.set.to_lowercase(), card.lang.to_lowercase(), front)
            .with_back(BackKind::DoubleFaced, back_name, back)
    } else {
        return Err(format!("{}: no image data", card.name));
    };

    let meld_result = if card.layout.as_deref() == Some("meld") {
        card.all_parts
            .iter()
            .flatten()
            .find(|part| part.component == "meld_result")
            .map(|part| part.name.clone())
            .filter(|result| !result.eq_ignore_ascii_case(&card.name))
    } else {
        None
    };

    Ok(DecodedCard {
        printing,
        meld_result,
    })
}

/// Catalog client for the Scryfall API.
pub struct ScryfallCatalog {
    client: reqwest::Client,
    base_url: String,
    cooldown: Duration,
    next_call: Mutex<Instant>,
}

impl ScryfallCatalog {
    /// Build a client from engine configuration.
    pub fn new(config: &EngineConfig) -> Result<Self, CatalogError> {
        let mut headers = HeaderMap::new();
        let agent = HeaderValue::from_str(&config.user_agent)
            .map_err(|e| CatalogError::Client(format!("invalid user agent: {}", e)))?;
        headers.insert(USER_AGENT, agent);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json;q=0.9,*/*;q=0.8"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| CatalogError::Client(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.catalog_base_url.trim_end_matches('/').to_string(),
            cooldown: config.catalog_cooldown,
            next_call: Mutex::new(Instant::now()),
        })
    }

    /// Wait for this caller's slot in the API call schedule.
    async fn throttle(&self) {
        let slot = {
            let mut next = self.next_call.lock();
            let slot = (*next).max(Instant::now());
            *next = slot + self.cooldown;
            slot
        };
        tokio::time::sleep_until(slot).await;
    }

    async fn get(&self, request: reqwest::RequestBuilder, url: &str) -> Result<reqwest::Response, CatalogError> {
        self.throttle().await;
        debug!(url = %url, "Calling catalog API");

        request.send().await.map_err(|e| CatalogError::Network {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }

    async fn decode_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        url: &str,
    ) -> Result<T, CatalogError> {
        let status = response.status();
        if !status.is_success() {
            return Err(CatalogError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        response.json::<T>().await.map_err(|e| CatalogError::Decode {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }

    /// Fetch every page of an exact-name search.
    async fn search_decoded(&self, name: &str) -> Result<Vec<DecodedCard>, CatalogError> {
        let url = format!("{}/cards/search", self.base_url);
        let query = format!("!\"{}\"", name);
        let request = self
            .client
            .get(&url)
            .query(&[("q", query.as_str()), ("unique", "prints")]);

        let mut response = self.get(request, &url).await?;
        let mut page_url = url;
        let mut cards = Vec::new();

        loop {
            if response.status() == StatusCode::NOT_FOUND {
                if cards.is_empty() {
                    return Err(CatalogError::NotFound(name.to_string()));
                }
                break;
            }

            let page: SearchPage = Self::decode_json(response, &page_url).await?;
            for value in page.data {
                match serde_json::from_value::<ScryfallCard>(value)
                    .map_err(|e| e.to_string())
                    .and_then(decode_card)
                {
                    Ok(card) => cards.push(card),
                    Err(reason) => debug!(name = %name, reason = %reason, "Skipping undecodable printing"),
                }
            }

            match (page.has_more, page.next_page) {
                (true, Some(next)) => {
                    let request = self.client.get(&next);
                    response = self.get(request, &next).await?;
                    page_url = next;
                }
                _ => break,
            }
        }

        if cards.is_empty() {
            return Err(CatalogError::NotFound(name.to_string()));
        }
        Ok(cards)
    }

    /// Fill in meld backs with the result card's front image.
    async fn resolve_melds(&self, cards: Vec<DecodedCard>) -> Vec<CardPrinting> {
        let mut results: HashMap<String, Option<Vec<CardPrinting>>> = HashMap::new();

        for card in &cards {
            if let Some(result) = &card.meld_result {
                if results.contains_key(result) {
                    continue;
                }
                let printings = match self.search_decoded(result).await {
                    Ok(found) => Some(found.into_iter().map(|c| c.printing).collect()),
                    Err(e) => {
                        warn!(meld_result = %result, error = %e, "Meld result lookup failed");
                        None
                    }
                };
                results.insert(result.clone(), printings);
            }
        }

        cards
            .into_iter()
            .map(|card| {
                let mut printing = card.printing;
                let Some(result) = card.meld_result else {
                    return printing;
                };
                let Some(Some(candidates)) = results.get(&result) else {
                    return printing;
                };

                let chosen = candidates
                    .iter()
                    .find(|c| c.set_code == printing.set_code)
                    .or_else(|| candidates.first());
                if let Some(back) = chosen {
                    printing = printing.with_back(BackKind::Meld, result, back.front_image_url.clone());
                }
                printing
            })
            .collect()
    }
}

impl Catalog for ScryfallCatalog {
    fn search_printings<'a>(
        &'a self,
        name: &'a str,
    ) -> BoxFuture<'a, Result<Vec<CardPrinting>, CatalogError>> {
        Box::pin(async move {
            let decoded = self.search_decoded(name).await?;
            let printings = self.resolve_melds(decoded).await;
            info!(name = %name, count = printings.len(), "Catalog search complete");
            Ok(printings)
        })
    }

    fn card_names(&self) -> BoxFuture<'_, Result<Vec<String>, CatalogError>> {
        Box::pin(async move {
            let url = format!("{}/catalog/card-names", self.base_url);
            let response = self.get(self.client.get(&url), &url).await?;
            let catalog: NamesCatalog = Self::decode_json(response, &url).await?;
            info!(count = catalog.data.len(), "Fetched card names");
            Ok(catalog.data)
        })
    }

    fn fetch_image<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Bytes, CatalogError>> {
        Box::pin(async move {
            let response = self.client.get(url).send().await.map_err(|e| CatalogError::Network {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

            let status = response.status();
            if !status.is_success() {
                return Err(CatalogError::Status {
                    url: url.to_string(),
                    status: status.as_u16(),
                });
            }

            response.bytes().await.map_err(|e| CatalogError::Network {
                url: url.to_string(),
                reason: e.to_string(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(json: serde_json::Value) -> ScryfallCard {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_decode_single_faced() {
        let decoded = decode_card(card(serde_json::json!({
            "name": "Lightning Bolt",
            "set": "M10",
            "lang": "en",
            "layout": "normal",
            "image_uris": {
                "normal": "https://cards.scryfall.io/normal/front/bolt.jpg",
                "border_crop": "https://cards.scryfall.io/border_crop/front/bolt.jpg"
            }
        })))
        .unwrap();

        assert_eq!(decoded.printing.name, "Lightning Bolt");
        assert_eq!(decoded.printing.set_code, "m10");
        assert_eq!(
            decoded.printing.front_image_url,
            "https://cards.scryfall.io/border_crop/front/bolt.jpg"
        );
        assert_eq!(decoded.printing.back_kind, BackKind::None);
        assert!(decoded.meld_result.is_none());
    }

    #[test]
    fn test_decode_double_faced() {
        let decoded = decode_card(card(serde_json::json!({
            "name": "Fable of the Mirror-Breaker // Reflection of Kiki-Jiki",
            "set": "neo",
            "lang": "en",
            "layout": "transform",
            "card_faces": [
                {
                    "name": "Fable of the Mirror-Breaker",
                    "image_uris": { "border_crop": "https://cards.scryfall.io/border_crop/front/fable.jpg" }
                },
                {
                    "name": "Reflection of Kiki-Jiki",
                    "image_uris": { "border_crop": "https://cards.scryfall.io/border_crop/back/fable.jpg" }
                }
            ]
        })))
        .unwrap();

        let printing = decoded.printing;
        assert_eq!(printing.back_kind, BackKind::DoubleFaced);
        assert_eq!(printing.back_name.as_deref(), Some("Reflection of Kiki-Jiki"));
        assert_eq!(
            printing.back_image_url.as_deref(),
            Some("https://cards.scryfall.io/border_crop/back/fable.jpg")
        );
    }

    #[test]
    fn test_decode_split_card_uses_shared_image() {
        // Split cards have card_faces but a single top-level image.
        let decoded = decode_card(card(serde_json::json!({
            "name": "Cut // Ribbons",
            "set": "akh",
            "lang": "en",
            "layout": "split",
            "image_uris": { "border_crop": "https://cards.scryfall.io/border_crop/front/cut.jpg" },
            "card_faces": [ { "name": "Cut" }, { "name": "Ribbons" } ]
        })))
        .unwrap();

        assert!(!decoded.printing.has_back());
    }

    #[test]
    fn test_decode_meld_records_result() {
        let decoded = decode_card(card(serde_json::json!({
            "name": "Urza, Lord Protector",
            "set": "bro",
            "lang": "en",
            "layout": "meld",
            "image_uris": { "border_crop": "https://cards.scryfall.io/border_crop/front/urza.jpg" },
            "all_parts": [
                { "component": "meld_result", "name": "Urza, Planeswalker" },
                { "component": "meld_part", "name": "The Mightstone and Weakstone" },
                { "component": "meld_part", "name": "Urza, Lord Protector" }
            ]
        })))
        .unwrap();

        assert_eq!(decoded.meld_result.as_deref(), Some("Urza, Planeswalker"));
        // The back URL is only known after the follow-up search.
        assert!(!decoded.printing.has_back());
        assert_eq!(decoded.printing.back_kind, BackKind::None);
    }

    #[test]
    fn test_decode_meld_result_itself_has_no_partner() {
        let decoded = decode_card(card(serde_json::json!({
            "name": "Urza, Planeswalker",
            "set": "bro",
            "lang": "en",
            "layout": "meld",
            "image_uris": { "border_crop": "https://cards.scryfall.io/border_crop/back/urza.jpg" },
            "all_parts": [ { "component": "meld_result", "name": "Urza, Planeswalker" } ]
        })))
        .unwrap();

        assert!(decoded.meld_result.is_none());
    }

    #[test]
    fn test_decode_without_images_fails() {
        let result = decode_card(card(serde_json::json!({
            "name": "Mystery",
            "set": "xyz",
            "lang": "en"
        })));
        assert!(result.is_err());
    }

    #[test]
    fn test_new_trims_base_url() {
        let config = EngineConfig::new("/tmp/x").with_catalog_base_url("http://localhost:9/");
        let catalog = ScryfallCatalog::new(&config).unwrap();
        assert_eq!(catalog.base_url, "http://localhost:9");
    }

    #[tokio::test]
    async fn test_throttle_spaces_calls() {
        let config = EngineConfig::new("/tmp/x").with_catalog_cooldown(Duration::from_millis(30));
        let catalog = ScryfallCatalog::new(&config).unwrap();

        let start = Instant::now();
        for _ in 0..3 {
            catalog.throttle().await;
        }
        assert!(start.elapsed() >= Duration::from_millis(60));
    }
}
