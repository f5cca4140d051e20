// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// ACL <-> CBOR.
//
//   {
//     "aclist": { "aces": [ ace, ... ] },
//     "rowneruuid": "<uuid>",
//     "rownercredid": n                       (optional)
//   }
//
//   ace = {
//     "subjectuuid": "<uuid>" | "*"           (exactly one of the two
//     "subjectrole": { "role", "authority"? }  subject forms)
//     "resources": [ { "href", "rt"?, "if"? }, ... ],
//     "permission": crudn-bits,
//     "validity": { "period": [nbf, naf] } | { "count": n }   (optional)
//   }

use chrono::{DateTime, Utc};
use serde_cbor::Value;
use srm_core::error::{ParseError, Result};
use srm_core::types::{
    Ace, Acl, CredentialRef, Permission, ResourceMatcher, Subject, Validity, WILDCARD,
};

use super::{Fields, Map, as_int, key, parse_document, parse_uuid, text, to_bytes, uint};

type ParseResult<T> = std::result::Result<T, ParseError>;

/// Decode an ACL payload. `Ok(None)` for an empty or `null` buffer.
pub fn decode_acl(bytes: &[u8]) -> ParseResult<Option<Acl>> {
    parse_document(bytes)?.map(|v| acl_from_value(&v)).transpose()
}

/// Encode an ACL.
pub fn encode_acl(acl: &Acl) -> Result<Vec<u8>> {
    to_bytes(&acl_to_value(acl))
}

/// Decode only the ACE list of an ACL payload (POST bodies need not carry
/// `rowneruuid`).
pub fn decode_aces(bytes: &[u8]) -> ParseResult<Option<Vec<Ace>>> {
    let Some(value) = parse_document(bytes)? else {
        return Ok(None);
    };
    let fields = Fields::of(&value)?;
    aces_from_aclist(fields.required("aclist")?)
        .map(Some)
        .map_err(|e| e.within("aclist"))
}

pub fn acl_from_value(value: &Value) -> ParseResult<Acl> {
    let fields = Fields::of(value)?;
    let aces = aces_from_aclist(fields.required("aclist")?).map_err(|e| e.within("aclist"))?;
    let rowner = fields.uuid("rowneruuid")?;
    let rowner_cred = match fields.optional("rownercredid") {
        Some(_) => {
            let id = fields.uint("rownercredid")?;
            let id = u16::try_from(id)
                .map_err(|_| ParseError::new("rownercredid", format!("{id} does not fit a credential id")))?;
            Some(CredentialRef(id))
        }
        None => None,
    };
    Ok(Acl {
        aces,
        rowner,
        rowner_cred,
    })
}

pub fn acl_to_value(acl: &Acl) -> Value {
    let mut aclist = Map::new();
    aclist.insert(
        key("aces"),
        Value::Array(acl.aces.iter().map(ace_to_value).collect()),
    );

    let mut root = Map::new();
    root.insert(key("aclist"), Value::Map(aclist));
    root.insert(key("rowneruuid"), text(&acl.rowner.to_string()));
    if let Some(CredentialRef(id)) = acl.rowner_cred {
        root.insert(key("rownercredid"), uint(id));
    }
    Value::Map(root)
}

fn aces_from_aclist(value: &Value) -> ParseResult<Vec<Ace>> {
    let fields = Fields::of(value)?;
    let items = fields.array("aces")?;
    if items.is_empty() {
        return Err(ParseError::new("aces", "at least one ACE is required"));
    }
    items
        .iter()
        .enumerate()
        .map(|(i, item)| ace_from_value(item).map_err(|e| e.within(&format!("[{i}]")).within("aces")))
        .collect()
}

fn ace_from_value(value: &Value) -> ParseResult<Ace> {
    let fields = Fields::of(value)?;
    let subject = subject_from_fields(&fields)?;

    let resources = fields
        .array("resources")?
        .iter()
        .enumerate()
        .map(|(i, r)| resource_from_value(r).map_err(|e| e.within(&format!("resources[{i}]"))))
        .collect::<ParseResult<Vec<_>>>()?;

    let bits = fields.uint("permission")?;
    let permission = u16::try_from(bits)
        .ok()
        .and_then(Permission::from_bits)
        .ok_or_else(|| ParseError::new("permission", format!("{bits:#x} has undefined bits")))?;

    let validity = fields
        .optional("validity")
        .map(|v| validity_from_value(v).map_err(|e| e.within("validity")))
        .transpose()?;

    Ace::new(subject, resources, permission, validity)
}

fn subject_from_fields(fields: &Fields<'_>) -> ParseResult<Subject> {
    match (fields.has("subjectuuid"), fields.has("subjectrole")) {
        (true, true) => Err(ParseError::new(
            "subjectrole",
            "conflicts with subjectuuid; an ACE has exactly one subject",
        )),
        (false, false) => Err(ParseError::new("subjectuuid", "required field is missing")),
        (true, false) => {
            let raw = fields.text("subjectuuid")?;
            if raw == WILDCARD {
                Ok(Subject::Anyone)
            } else {
                parse_uuid(raw)
                    .map(Subject::Uuid)
                    .map_err(|e| e.within("subjectuuid"))
            }
        }
        (false, true) => {
            let role = Fields::of(fields.required("subjectrole")?).map_err(|e| e.within("subjectrole"))?;
            let name = role.text("role").map_err(|e| e.within("subjectrole"))?;
            let authority = match role.optional("authority") {
                Some(_) => Some(role.text("authority").map_err(|e| e.within("subjectrole"))?.to_owned()),
                None => None,
            };
            Ok(Subject::Role {
                role: name.to_owned(),
                authority,
            })
        }
    }
}

fn subject_into(map: &mut Map, subject: &Subject) {
    match subject {
        Subject::Uuid(id) => {
            map.insert(key("subjectuuid"), text(&id.to_string()));
        }
        Subject::Anyone => {
            map.insert(key("subjectuuid"), text(WILDCARD));
        }
        Subject::Role { role, authority } => {
            let mut r = Map::new();
            r.insert(key("role"), text(role));
            if let Some(authority) = authority {
                r.insert(key("authority"), text(authority));
            }
            map.insert(key("subjectrole"), Value::Map(r));
        }
    }
}

fn resource_from_value(value: &Value) -> ParseResult<ResourceMatcher> {
    let fields = Fields::of(value)?;
    let href = fields.text("href")?;
    Ok(ResourceMatcher {
        href: href.to_owned(),
        resource_types: fields.strings("rt")?,
        interfaces: fields.strings("if")?,
    })
}

fn resource_to_value(resource: &ResourceMatcher) -> Value {
    let strings = |items: &[String]| Value::Array(items.iter().map(|s| text(s)).collect());
    let mut map = Map::new();
    map.insert(key("href"), text(&resource.href));
    if !resource.resource_types.is_empty() {
        map.insert(key("rt"), strings(&resource.resource_types));
    }
    if !resource.interfaces.is_empty() {
        map.insert(key("if"), strings(&resource.interfaces));
    }
    Value::Map(map)
}

fn validity_from_value(value: &Value) -> ParseResult<Validity> {
    let fields = Fields::of(value)?;
    match (fields.has("period"), fields.has("count")) {
        (true, true) => Err(ParseError::new("count", "conflicts with period")),
        (false, false) => Err(ParseError::new("period", "validity needs a period or a count")),
        (true, false) => {
            let bounds = fields.array("period")?;
            let [nbf, naf] = bounds else {
                return Err(ParseError::new("period", "expected [not_before, not_after]"));
            };
            Ok(Validity::Period {
                not_before: timestamp(nbf).map_err(|e| e.within("period[0]"))?,
                not_after: timestamp(naf).map_err(|e| e.within("period[1]"))?,
            })
        }
        (false, true) => {
            let count = fields.uint("count")?;
            u32::try_from(count)
                .map(Validity::Count)
                .map_err(|_| ParseError::new("count", format!("{count} is too large")))
        }
    }
}

fn validity_to_value(validity: &Validity) -> Value {
    let mut map = Map::new();
    match validity {
        Validity::Period {
            not_before,
            not_after,
        } => {
            map.insert(
                key("period"),
                Value::Array(vec![
                    Value::Integer(not_before.timestamp().into()),
                    Value::Integer(not_after.timestamp().into()),
                ]),
            );
        }
        Validity::Count(n) => {
            map.insert(key("count"), uint(*n));
        }
    }
    Value::Map(map)
}

fn timestamp(value: &Value) -> ParseResult<DateTime<Utc>> {
    let secs = as_int(value)?;
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| ParseError::root(format!("{secs} is not a representable time")))
}

fn ace_to_value(ace: &Ace) -> Value {
    let mut map = Map::new();
    subject_into(&mut map, ace.subject());
    map.insert(
        key("resources"),
        Value::Array(ace.resources().iter().map(resource_to_value).collect()),
    );
    map.insert(key("permission"), uint(ace.permission().bits()));
    if let Some(validity) = ace.validity() {
        map.insert(key("validity"), validity_to_value(validity));
    }
    Value::Map(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use uuid::Uuid;

    fn sample_acl() -> Acl {
        let owner = Uuid::new_v4();
        let aces = vec![
            Ace::new(
                Subject::Anyone,
                vec![ResourceMatcher {
                    href: "/oic/res".into(),
                    resource_types: vec!["oic.wk.res".into()],
                    interfaces: vec!["oic.if.ll".into(), "oic.if.baseline".into()],
                }],
                Permission::RETRIEVE,
                None,
            )
            .unwrap(),
            Ace::new(
                Subject::Role {
                    role: "admin".into(),
                    authority: Some("ca.example".into()),
                },
                vec![ResourceMatcher::any()],
                Permission::CRUD | Permission::NOTIFY,
                Some(Validity::Period {
                    not_before: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
                    not_after: DateTime::from_timestamp(1_800_000_000, 0).unwrap(),
                }),
            )
            .unwrap(),
            Ace::new(
                Subject::Uuid(owner),
                vec![ResourceMatcher::href("/oic/sec/acl")],
                Permission::RETRIEVE | Permission::UPDATE,
                Some(Validity::Count(3)),
            )
            .unwrap(),
        ];
        Acl {
            aces,
            rowner: owner,
            rowner_cred: Some(CredentialRef(4)),
        }
    }

    /// Build an ACL payload by hand, bypassing the encoder.
    fn payload(ace: Map) -> Vec<u8> {
        let mut aclist = Map::new();
        aclist.insert(key("aces"), Value::Array(vec![Value::Map(ace)]));
        let mut root = Map::new();
        root.insert(key("aclist"), Value::Map(aclist));
        root.insert(key("rowneruuid"), text(&Uuid::nil().to_string()));
        serde_cbor::to_vec(&Value::Map(root)).unwrap()
    }

    fn read_only_ace() -> Map {
        let mut resource = Map::new();
        resource.insert(key("href"), text("/light"));
        let mut ace = Map::new();
        ace.insert(key("subjectuuid"), text("*"));
        ace.insert(key("resources"), Value::Array(vec![Value::Map(resource)]));
        ace.insert(key("permission"), uint(2u8));
        ace
    }

    #[test]
    fn sample_round_trips() {
        let acl = sample_acl();
        let bytes = encode_acl(&acl).unwrap();
        assert_eq!(decode_acl(&bytes).unwrap(), Some(acl));
    }

    #[test]
    fn optional_fields_are_omitted() {
        let acl = Acl::new(
            vec![Ace::new(Subject::Anyone, vec![ResourceMatcher::href("/a")], Permission::RETRIEVE, None).unwrap()],
            Uuid::nil(),
        );
        let Value::Map(root) = acl_to_value(&acl) else {
            panic!("ACL must encode as a map");
        };
        assert!(!root.contains_key(&key("rownercredid")));
        let Value::Map(aclist) = &root[&key("aclist")] else {
            panic!("aclist must be a map");
        };
        let Value::Array(aces) = &aclist[&key("aces")] else {
            panic!("aces must be an array");
        };
        let Value::Map(ace) = &aces[0] else {
            panic!("ace must be a map");
        };
        assert!(!ace.contains_key(&key("validity")));
        let Value::Array(resources) = &ace[&key("resources")] else {
            panic!("resources must be an array");
        };
        let Value::Map(resource) = &resources[0] else {
            panic!("resource must be a map");
        };
        assert_eq!(resource.len(), 1);
    }

    #[test]
    fn empty_buffer_is_not_an_error() {
        assert_eq!(decode_acl(&[]).unwrap(), None);
    }

    #[test]
    fn hand_built_payload_decodes() {
        let acl = decode_acl(&payload(read_only_ace())).unwrap().unwrap();
        assert_eq!(acl.aces.len(), 1);
        assert_eq!(*acl.aces[0].subject(), Subject::Anyone);
        assert!(!acl.is_owned());
    }

    #[test]
    fn conflicting_subjects_are_rejected() {
        let mut ace = read_only_ace();
        let mut role = Map::new();
        role.insert(key("role"), text("admin"));
        ace.insert(key("subjectrole"), Value::Map(role));
        let err = decode_acl(&payload(ace)).unwrap_err();
        assert_eq!(err.field, "aclist.aces[0].subjectrole");
    }

    #[test]
    fn empty_permission_is_rejected() {
        let mut ace = read_only_ace();
        ace.insert(key("permission"), uint(0u8));
        let err = decode_acl(&payload(ace)).unwrap_err();
        assert_eq!(err.field, "aclist.aces[0].permission");
    }

    #[test]
    fn undefined_permission_bits_are_rejected() {
        let mut ace = read_only_ace();
        ace.insert(key("permission"), uint(0x40u8));
        let err = decode_acl(&payload(ace)).unwrap_err();
        assert_eq!(err.field, "aclist.aces[0].permission");
    }

    #[test]
    fn missing_resources_are_named() {
        let mut ace = read_only_ace();
        ace.remove(&key("resources"));
        let err = decode_acl(&payload(ace)).unwrap_err();
        assert_eq!(err.field, "aclist.aces[0].resources");
    }

    #[test]
    fn bad_resource_href_is_named() {
        let mut ace = read_only_ace();
        let mut resource = Map::new();
        resource.insert(key("href"), uint(7u8));
        ace.insert(key("resources"), Value::Array(vec![Value::Map(resource)]));
        let err = decode_acl(&payload(ace)).unwrap_err();
        assert_eq!(err.field, "aclist.aces[0].resources[0].href");
    }

    #[test]
    fn empty_resource_href_is_named() {
        let mut ace = read_only_ace();
        let mut resource = Map::new();
        resource.insert(key("href"), text(""));
        ace.insert(key("resources"), Value::Array(vec![Value::Map(resource)]));
        let err = decode_acl(&payload(ace)).unwrap_err();
        assert_eq!(err.field, "aclist.aces[0].resources[0].href");
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let bytes = encode_acl(&sample_acl()).unwrap();
        let err = decode_acl(&bytes[..bytes.len() - 3]).unwrap_err();
        assert_eq!(err.field, "<root>");
    }

    #[test]
    fn empty_ace_list_is_rejected() {
        let mut aclist = Map::new();
        aclist.insert(key("aces"), Value::Array(vec![]));
        let mut root = Map::new();
        root.insert(key("aclist"), Value::Map(aclist));
        root.insert(key("rowneruuid"), text(&Uuid::nil().to_string()));
        let bytes = serde_cbor::to_vec(&Value::Map(root)).unwrap();
        assert_eq!(decode_acl(&bytes).unwrap_err().field, "aclist.aces");
    }

    #[test]
    fn post_body_without_rowner_decodes_aces() {
        let aces = decode_aces(&payload(read_only_ace())).unwrap().unwrap();
        assert_eq!(aces.len(), 1);
    }

    fn arb_subject() -> impl Strategy<Value = Subject> {
        prop_oneof![
            Just(Subject::Anyone),
            any::<u128>().prop_map(|n| Subject::Uuid(Uuid::from_u128(n))),
            ("[a-z]{1,8}", proptest::option::of("[a-z.]{1,12}"))
                .prop_map(|(role, authority)| Subject::Role { role, authority }),
        ]
    }

    fn arb_resource() -> impl Strategy<Value = ResourceMatcher> {
        (
            "/[a-z/]{1,16}|\\*",
            proptest::collection::vec("oic\\.r\\.[a-z]{1,6}", 0..3),
            proptest::collection::vec("oic\\.if\\.[a-z]{1,6}", 0..3),
        )
            .prop_map(|(href, resource_types, interfaces)| ResourceMatcher {
                href,
                resource_types,
                interfaces,
            })
    }

    fn arb_validity() -> impl Strategy<Value = Option<Validity>> {
        proptest::option::of(prop_oneof![
            any::<u32>().prop_map(Validity::Count),
            (0i64..4_000_000_000, 0i64..1_000_000).prop_map(|(start, len)| Validity::Period {
                not_before: DateTime::from_timestamp(start, 0).unwrap(),
                not_after: DateTime::from_timestamp(start + len, 0).unwrap(),
            }),
        ])
    }

    fn arb_ace() -> impl Strategy<Value = Ace> {
        (
            arb_subject(),
            proptest::collection::vec(arb_resource(), 1..4),
            1u16..32,
            arb_validity(),
        )
            .prop_map(|(subject, resources, bits, validity)| {
                Ace::new(subject, resources, Permission::from_bits_truncate(bits), validity)
                    .expect("strategy builds structurally valid ACEs")
            })
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(
            aces in proptest::collection::vec(arb_ace(), 1..6),
            owner in any::<u128>(),
            cred in proptest::option::of(any::<u16>()),
        ) {
            let acl = Acl {
                aces,
                rowner: Uuid::from_u128(owner),
                rowner_cred: cred.map(CredentialRef),
            };
            let bytes = encode_acl(&acl).unwrap();
            prop_assert_eq!(decode_acl(&bytes).unwrap(), Some(acl));
        }

        #[test]
        fn blank_href_never_builds_an_ace(
            subject in arb_subject(),
            mut resources in proptest::collection::vec(arb_resource(), 1..4),
            at in any::<proptest::sample::Index>(),
            bits in 1u16..32,
        ) {
            let i = at.index(resources.len());
            resources[i].href.clear();
            let err = Ace::new(subject, resources, Permission::from_bits_truncate(bits), None).unwrap_err();
            prop_assert_eq!(err.field, format!("resources[{i}].href"));
        }
    }
}
