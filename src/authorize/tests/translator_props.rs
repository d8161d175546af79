//! Property tests for request translation and route matching

mod common;

use common::{check_request, harness, RecordingEvaluator};
use pem::{EncodeConfig, LineEnding, Pem};
use proptest::prelude::*;
use sentinel_authorize::client_cert::client_certificate_info;
use sentinel_authorize::http::{canonical_query, query_escape, query_unescape};
use sentinel_authorize::policy::find_matching_policy;
use sentinel_authorize::{Options, Policy};
use serde_json::{json, Map, Value};

fn certificate(contents: &[u8]) -> String {
    pem::encode_config(
        &Pem::new("CERTIFICATE", contents),
        EncodeConfig::new().set_line_ending(LineEnding::LF),
    )
}

proptest! {
    #[test]
    fn test_query_component_survives_escaping(s in "\\PC{0,24}") {
        prop_assert_eq!(query_unescape(&query_escape(&s)), Some(s));
    }

    #[test]
    fn test_canonical_query_is_stable(raw in "[a-c=&+;%0-9]{0,32}") {
        let once = canonical_query(&raw);
        prop_assert_eq!(canonical_query(&once), once.clone());
        prop_assert!(!once.contains(';'));
    }

    #[test]
    fn test_client_chain_splits_leaf_from_rest(
        blocks in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 1..48), 1..5)
    ) {
        let encoded: Vec<String> = blocks.iter().map(|b| certificate(b)).collect();
        let chain = encoded.concat();

        let mut metadata = Map::new();
        metadata.insert("presented".into(), Value::Bool(true));
        metadata.insert("chain".into(), json!(query_escape(&chain)));

        let info = client_certificate_info(Some(&metadata));
        prop_assert!(info.presented);
        prop_assert_eq!(&info.leaf, &encoded[0]);
        prop_assert_eq!(info.intermediates, encoded[1..].concat());
    }

    #[test]
    fn test_every_policy_found_by_its_route_id(
        hosts in proptest::collection::btree_set("[a-z]{1,10}", 1..6)
    ) {
        let policies: Vec<Policy> = hosts
            .iter()
            .map(|h| Policy::new(format!("https://{}.example.com", h)))
            .collect();
        let options = Options {
            policies: policies.clone(),
            ..Default::default()
        };

        for policy in &policies {
            prop_assert_eq!(find_matching_policy(&options, policy.route_id()), Some(policy));
        }
    }

    #[test]
    fn test_evaluator_sees_decoded_path(segment in "[a-z0-9]{1,12}( [a-z0-9]{1,6})?") {
        tokio_test::block_on(async {
            let h = harness(RecordingEvaluator::allowing(), vec![]);
            let raw = format!("/{}", segment.replace(' ', "%20"));

            let response = h.authorize.check(&check_request(0, &raw, &[])).await.unwrap();
            assert!(response.is_ok());

            let http = h.evaluator.last_request().unwrap().http;
            assert_eq!(http.path, format!("/{}", segment));
            assert_eq!(http.url.raw_path, raw);
        });
    }
}
