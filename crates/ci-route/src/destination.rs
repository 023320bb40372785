//! Destination descriptors and the candidate-ordering strategies.

use std::sync::Arc;

use ci_transport::EndpointId;

/// One outbound endpoint a logical device exposes, as presented to the
/// resolver. The transport itself only deals in opaque IDs; the display
/// name a destination carries is session-level metadata supplied by
/// whatever enumerates the transport's destinations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub id: EndpointId,
    pub name: String,
}

/// Orders a device's candidate destinations for a resolution attempt.
#[derive(Clone)]
pub enum DestinationStrategy {
    PreferModule,
    PreferNameMatch,
    Automatic,
    Custom(Arc<dyn Fn(Option<EndpointId>, Option<&str>, &[Destination]) -> Vec<EndpointId> + Send + Sync>),
}

impl std::fmt::Debug for DestinationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DestinationStrategy::PreferModule => write!(f, "PreferModule"),
            DestinationStrategy::PreferNameMatch => write!(f, "PreferNameMatch"),
            DestinationStrategy::Automatic => write!(f, "Automatic"),
            DestinationStrategy::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

fn push_unique(out: &mut Vec<EndpointId>, id: EndpointId) {
    if !out.contains(&id) {
        out.push(id);
    }
}

fn prefer_module(
    source_hint: Option<EndpointId>,
    source_name: Option<&str>,
    destinations: &[Destination],
) -> Vec<EndpointId> {
    let mut out = Vec::new();
    for d in destinations {
        if d.name.to_ascii_lowercase().contains("module") {
            push_unique(&mut out, d.id);
        }
    }
    if let Some(hint) = source_hint {
        if destinations.iter().any(|d| d.id == hint) {
            push_unique(&mut out, hint);
        }
    }
    if let Some(name) = source_name {
        for d in destinations {
            if d.name.eq_ignore_ascii_case(name) {
                push_unique(&mut out, d.id);
            }
        }
    }
    for d in destinations {
        push_unique(&mut out, d.id);
    }
    out
}

fn prefer_name_match(
    source_hint: Option<EndpointId>,
    source_name: Option<&str>,
    destinations: &[Destination],
) -> Vec<EndpointId> {
    let mut out = Vec::new();
    if let Some(name) = source_name {
        for d in destinations {
            if d.name.eq_ignore_ascii_case(name) {
                push_unique(&mut out, d.id);
            }
        }
    }
    if let Some(hint) = source_hint {
        if destinations.iter().any(|d| d.id == hint) {
            push_unique(&mut out, hint);
        }
    }
    for d in destinations {
        push_unique(&mut out, d.id);
    }
    out
}

/// Compute the ordered candidate list for `strategy`.
pub fn candidates(
    strategy: &DestinationStrategy,
    source_hint: Option<EndpointId>,
    source_name: Option<&str>,
    destinations: &[Destination],
) -> Vec<EndpointId> {
    match strategy {
        DestinationStrategy::PreferModule => prefer_module(source_hint, source_name, destinations),
        DestinationStrategy::PreferNameMatch => {
            prefer_name_match(source_hint, source_name, destinations)
        }
        DestinationStrategy::Automatic => {
            let any_module = destinations
                .iter()
                .any(|d| d.name.to_ascii_lowercase().contains("module"));
            if any_module {
                prefer_module(source_hint, source_name, destinations)
            } else {
                prefer_name_match(source_hint, source_name, destinations)
            }
        }
        DestinationStrategy::Custom(f) => f(source_hint, source_name, destinations),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dests() -> Vec<Destination> {
        vec![
            Destination {
                id: EndpointId(1),
                name: "Bluetooth".into(),
            },
            Destination {
                id: EndpointId(2),
                name: "Session 1".into(),
            },
            Destination {
                id: EndpointId(3),
                name: "Module".into(),
            },
        ]
    }

    #[test]
    fn prefer_module_puts_module_destination_first() {
        let c = candidates(&DestinationStrategy::PreferModule, None, None, &dests());
        assert_eq!(c[0], EndpointId(3));
        assert_eq!(c.len(), 3);
    }

    #[test]
    fn prefer_module_then_entity_match_from_source_hint() {
        let c = candidates(
            &DestinationStrategy::PreferModule,
            Some(EndpointId(1)),
            None,
            &dests(),
        );
        assert_eq!(c[0], EndpointId(3));
        assert_eq!(c[1], EndpointId(1));
    }

    #[test]
    fn prefer_name_match_puts_exact_name_match_first() {
        let c = candidates(
            &DestinationStrategy::PreferNameMatch,
            None,
            Some("session 1"),
            &dests(),
        );
        assert_eq!(c[0], EndpointId(2));
    }

    #[test]
    fn automatic_selects_prefer_module_when_a_module_destination_exists() {
        let c = candidates(&DestinationStrategy::Automatic, None, None, &dests());
        assert_eq!(c[0], EndpointId(3));
    }

    #[test]
    fn automatic_falls_back_to_prefer_name_match_without_a_module_destination() {
        let no_module = vec![
            Destination {
                id: EndpointId(1),
                name: "Bluetooth".into(),
            },
            Destination {
                id: EndpointId(2),
                name: "Session 1".into(),
            },
        ];
        let c = candidates(
            &DestinationStrategy::Automatic,
            None,
            Some("bluetooth"),
            &no_module,
        );
        assert_eq!(c[0], EndpointId(1));
    }

    #[test]
    fn custom_strategy_delegates_to_supplied_closure() {
        let strategy = DestinationStrategy::Custom(Arc::new(|_, _, dests: &[Destination]| {
            dests.iter().rev().map(|d| d.id).collect()
        }));
        let c = candidates(&strategy, None, None, &dests());
        assert_eq!(c, vec![EndpointId(3), EndpointId(2), EndpointId(1)]);
    }
}
