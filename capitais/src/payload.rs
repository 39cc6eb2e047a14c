//! # Payload Codec
//!
//! Parses, builds, and upgrades the v2 order-list document stored under a
//! credential key. `upgrade` is a total function: given any prior raw value
//! (or none), it always returns a well-formed v2 [`Payload`].
//!
//! The legacy single-order shape (`{conta, requisicao_id, scope, ordem_id,
//! dados}`) is recognised and folded into the v2 `ordens` list without loss;
//! see the spec's "Per request vs per account key policy" design note.

use serde::{Deserialize, Serialize};

/// Fixed `scope` discriminator carried by every v2 payload.
pub const SCOPE: &str = "consulta_reqs";

/// One order entry inside a [`Payload`]'s `ordens` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderEntry {
    pub ordem_id: i64,
    pub id_robo: i64,
    pub id_tipo_ordem: Option<i64>,
    pub tipo: String,
    pub symbol: Option<String>,
}

/// The v2 payload document published under a credential.
///
/// Invariant: `ordens` contains at most one entry per distinct `id_robo`,
/// enforced by [`Payload::merge_order`] rather than by construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub conta: String,
    pub requisicao_id: Option<i64>,
    pub scope: String,
    pub ordens: Vec<OrderEntry>,
}

impl Payload {
    /// Builds an empty v2 payload for `id_conta`, tagged with `requisicao_id`
    /// (which may be `None` when there is no request to attribute it to).
    pub fn build_skeleton(id_conta: i64, requisicao_id: Option<i64>) -> Self {
        Self {
            conta: id_conta.to_string(),
            requisicao_id,
            scope: SCOPE.to_string(),
            ordens: Vec::new(),
        }
    }

    /// Inserts or replaces `order` by `id_robo`, preserving its position when
    /// replacing. Returns the `ordem_id` displaced by a replace, if any
    /// (i.e. when it differs from the new entry's), so the caller can retire
    /// the superseded `Order` row.
    pub fn merge_order(&mut self, order: OrderEntry) -> Option<i64> {
        match self
            .ordens
            .iter_mut()
            .find(|entry| entry.id_robo == order.id_robo)
        {
            Some(existing) => {
                let displaced_ordem_id = existing.ordem_id;
                let new_ordem_id = order.ordem_id;
                *existing = order;
                (displaced_ordem_id != new_ordem_id).then_some(displaced_ordem_id)
            }
            None => {
                self.ordens.push(order);
                None
            }
        }
    }
}

/// Internal wire shape recognised as v2: presence of the `ordens` key is what
/// distinguishes it from the legacy shape.
#[derive(Debug, Deserialize)]
struct RawV2 {
    conta: Option<String>,
    requisicao_id: Option<i64>,
    scope: Option<String>,
    ordens: Vec<OrderEntry>,
}

/// Internal wire shape recognised as legacy: a single embedded order under
/// `dados`, keyed by a top-level `ordem_id`.
#[derive(Debug, Deserialize)]
struct RawLegacy {
    #[serde(default)]
    ordem_id: Option<i64>,
    #[serde(default)]
    dados: Option<LegacyDados>,
}

#[derive(Debug, Deserialize)]
struct LegacyDados {
    #[serde(default)]
    id_robo: Option<i64>,
    #[serde(default)]
    id_tipo_ordem: Option<i64>,
    #[serde(default)]
    tipo: Option<String>,
    #[serde(default)]
    symbol: Option<String>,
}

/// Upgrades whatever is stored under an existing credential into a
/// well-formed v2 [`Payload`]. Total: absent input, invalid JSON, and the
/// legacy single-order shape are all folded into a v2 document.
///
/// `id_conta` and `numero_unico_hint` are used only to fill fields that are
/// missing or null in the source document; existing non-null fields are
/// never overwritten.
pub fn upgrade(raw: Option<&str>, id_conta: i64, numero_unico_hint: Option<&str>) -> Payload {
    let hinted_requisicao_id = numero_unico_hint.and_then(requisicao_id_from_numero_unico);

    let value = match raw.map(serde_json::from_str::<serde_json::Value>) {
        Some(Ok(value)) => value,
        _ => return Payload::build_skeleton(id_conta, hinted_requisicao_id),
    };

    let is_v2 = value.get("ordens").is_some();

    if is_v2 {
        match serde_json::from_value::<RawV2>(value) {
            Ok(raw_v2) => Payload {
                conta: raw_v2.conta.unwrap_or_else(|| id_conta.to_string()),
                requisicao_id: raw_v2.requisicao_id.or(hinted_requisicao_id),
                scope: raw_v2.scope.unwrap_or_else(|| SCOPE.to_string()),
                ordens: raw_v2.ordens,
            },
            Err(_) => Payload::build_skeleton(id_conta, hinted_requisicao_id),
        }
    } else {
        let legacy = serde_json::from_value::<RawLegacy>(value).ok();
        let mut payload = Payload::build_skeleton(id_conta, hinted_requisicao_id);

        if let Some(RawLegacy {
            ordem_id: Some(ordem_id),
            dados,
        }) = legacy
        {
            let dados = dados.unwrap_or(LegacyDados {
                id_robo: None,
                id_tipo_ordem: None,
                tipo: None,
                symbol: None,
            });
            payload.ordens.push(OrderEntry {
                ordem_id,
                id_robo: dados.id_robo.unwrap_or_default(),
                id_tipo_ordem: dados.id_tipo_ordem,
                tipo: dados.tipo.unwrap_or_default(),
                symbol: dados.symbol,
            });
        }

        payload
    }
}

/// Parses the `requisicao_id` out of a `numero_unico` of shape
/// `REQ-<requisicao_id>-<conta_meta_trader>`. Returns `None` for anything
/// that doesn't start with `REQ-` or whose middle segment isn't an integer.
pub fn requisicao_id_from_numero_unico(numero_unico: &str) -> Option<i64> {
    let rest = numero_unico.strip_prefix("REQ-")?;
    let (id_segment, _conta) = rest.split_once('-')?;
    id_segment.parse().ok()
}
