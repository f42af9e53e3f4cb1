use ddm_subdomain::prelude::*;

fn custom() -> SubdomainConfig {
    SubdomainConfig::default()
        .with_tags(SubdomainCommTags::from_base(CommTag::new(0x7000)))
        .with_numbering_base(IndexBase::One)
        .with_interaction(InteractionOptions {
            symmetric: Some(true),
            sorted: false,
            scale: true,
        })
        .with_assembly(AssemblyOptions { allow_alias: true })
}

#[test]
fn config_json_roundtrip() {
    let cfg = custom();
    let s = serde_json::to_string(&cfg).expect("serialize");
    let back: SubdomainConfig = serde_json::from_str(&s).expect("deserialize");
    assert_eq!(back, cfg);
}

#[test]
fn config_bincode_roundtrip() {
    let cfg = custom();
    let bytes = bincode::serialize(&cfg).expect("serialize");
    let back: SubdomainConfig = bincode::deserialize(&bytes).expect("deserialize");
    assert_eq!(back, cfg);
}

#[test]
fn neighbor_map_bincode_roundtrip() {
    let m = NeighborMap::new(5, 2, vec![(4, vec![4, 3]), (0, vec![0])]).unwrap();
    let bytes = bincode::serialize(&m).expect("serialize");
    let back: NeighborMap = bincode::deserialize(&bytes).expect("deserialize");
    assert_eq!(back, m);
    assert_eq!(back.ranks().collect::<Vec<_>>(), vec![0, 4]);
}

#[test]
fn default_config_from_json_fields() {
    let json = serde_json::to_value(SubdomainConfig::default()).unwrap();
    assert_eq!(json["ownership_threshold"], 0.1);
    assert_eq!(json["numbering_base"], "Zero");
    assert_eq!(json["interaction"]["sorted"], true);
}
