use annolab_common::protocol::inbound::{DeltaEntry, ServerMessage};
use annolab_common::protocol::outbound::{BatchOption, ClientRequest, DbCasSource, WorkBatch};
use annolab_common::protocol::{cmd, DEFAULT_PAGE_SIZE};
use annolab_common::types::{batch_identifier, Command, FeatureMap};
use proptest::prelude::*;
use serde_json::{json, Value};

fn every_request() -> Vec<ClientRequest> {
    vec![
        ClientRequest::Session { session: "token".into() },
        ClientRequest::Ping {},
        ClientRequest::OpenCas { cas_id: "42".into() },
        ClientRequest::CloseCas { cas_id: "42".into() },
        ClientRequest::SaveCas { cas_id: "42".into() },
        ClientRequest::OpenSchema { cas_id: "42".into() },
        ClientRequest::OpenView { cas_id: "42".into(), view: "v".into(), force: true },
        ClientRequest::CloseView { cas_id: "42".into(), view: "v".into() },
        ClientRequest::OpenTool { cas_id: "42".into(), view: None, tool_name: "Time".into() },
        ClientRequest::OpenToolSeg {
            cas_id: "42".into(),
            view: None,
            page: 1,
            pages: DEFAULT_PAGE_SIZE,
            tool_name: "Time".into(),
        },
        ClientRequest::CloseTool { cas_id: "42".into(), tool_name: "Time".into() },
        ClientRequest::OpenProject { project_id: "7".into(), view_name: "v".into() },
        ClientRequest::ListProjectStats { project_id: "7".into(), view_name: "v".into() },
        ClientRequest::WorkBatch(WorkBatch {
            cas_id: "42".into(),
            tool_name: None,
            view: None,
            perspective: "default".into(),
            queue: Vec::new(),
            options: vec![BatchOption { private_session: true }],
        }),
        ClientRequest::CreateSchema { name: "schema".into(), parent: 27221 },
        ClientRequest::CreateCas { xmi: "<xmi/>".into() },
        ClientRequest::CreateDbCas(DbCasSource::Document { cas_id: "42".into(), parent: 1 }),
        ClientRequest::CreateDbCasFast {
            name: "n".into(),
            description: "d".into(),
            parent: 1,
            xmi: "<xmi/>".into(),
        },
        ClientRequest::SetMeta {
            cas_id: "42".into(),
            view: "v".into(),
            tool: "t".into(),
            key: "k".into(),
            value: json!(1),
        },
        ClientRequest::UserPosition { cas_id: "42".into(), addr: "5".into() },
        ClientRequest::Recommendation {
            cas_id: "42".into(),
            kind: "NER".into(),
            view: None,
            tool: None,
        },
        ClientRequest::Export { repository: 1, kind: "category".into(), view: String::new() },
    ]
}

#[test]
fn outbound_vocabulary_is_complete() {
    let sent: Vec<&str> = every_request().iter().map(ClientRequest::cmd).collect();
    for expected in [
        cmd::SESSION,
        cmd::PING,
        cmd::OPEN_CAS,
        cmd::CLOSE_CAS,
        cmd::SAVE_CAS,
        cmd::OPEN_VIEW,
        cmd::CLOSE_VIEW,
        cmd::OPEN_TOOL,
        cmd::OPEN_TOOL_SEG,
        cmd::CLOSE_TOOL,
        cmd::OPEN_PROJECT,
        cmd::LIST_PROJECT_STATS,
        cmd::WORK_BATCH,
        cmd::CREATE_SCHEMA,
        cmd::CREATE_CAS,
        cmd::CREATE_DB_CAS,
        cmd::CREATE_DB_CAS_FAST,
        cmd::SET_META,
        cmd::USER_POSITION,
        cmd::EXPORT,
        cmd::RECOMMENDATION,
    ] {
        assert!(sent.contains(&expected), "missing outbound cmd {expected}");
    }
}

#[test]
fn every_request_encodes_as_cmd_data_envelope() {
    for request in every_request() {
        let encoded: Value = serde_json::from_str(&request.encode().unwrap()).unwrap();
        let object = encoded.as_object().unwrap();
        assert_eq!(object.len(), 2, "unexpected keys in {encoded}");
        assert_eq!(object["cmd"], json!(request.cmd()));
        assert!(object["data"].is_object(), "data must be an object for {}", request.cmd());
    }
}

#[test]
fn inbound_vocabulary_decodes_to_typed_messages() {
    let frames = [
        json!({"cmd": "session"}),
        json!({"cmd": "open_cas", "data": {"casId": "42", "text": "t"}}),
        json!({"cmd": "open_schema", "data": {"casId": "42"}}),
        json!({"cmd": "change_cas", "data": {"casId": "42", "updates": {}}}),
        json!({"cmd": "open_project", "data": {"casId": "99"}}),
        json!({"cmd": "open_tool", "data": {"casId": "42", "toolName": "Time", "toolElements": {}}}),
        json!({"cmd": "open_tool_seg", "data": {"casId": "42", "toolElements": {}}}),
        json!({"cmd": "open_view", "data": {"casId": "42", "view": "v"}}),
        json!({"cmd": "msg", "data": {"text": "hello"}}),
        json!({"cmd": "export", "data": {}}),
        json!({"cmd": "export_progress", "data": {"progress": 1, "total": 2}}),
        json!({"cmd": "list_project_stats", "stats": {}, "project_data": {"success": false}}),
    ];
    for frame in frames {
        let message = ServerMessage::decode(&frame).unwrap();
        assert!(
            !matches!(message, ServerMessage::Unrecognized(_)),
            "{frame} decoded as unrecognized"
        );
    }
}

#[test]
fn scenario_b_delta_shape() {
    let frame = json!({"cmd":"change_cas","data":{"casId":"42","updates":{"Comment":{"x1":{}, "x2":{"features":{"k":"v"}}}}}});
    let ServerMessage::ChangeCas(change) = ServerMessage::decode(&frame).unwrap() else {
        panic!("expected change_cas");
    };
    assert_eq!(change.updates["Comment"].len(), 2);
    assert_eq!(change.updates["Comment"]["x1"], DeltaEntry::Delete);
}

proptest! {
    #[test]
    fn queued_commands_keep_their_order_on_the_wire(kinds in proptest::collection::vec(0u8..5, 0..24)) {
        let queue: Vec<Command> = kinds
            .iter()
            .enumerate()
            .map(|(i, kind)| {
                let bid = batch_identifier(i);
                let addr = format!("a{i}");
                match kind {
                    0 => Command::Create { bid, type_name: "T".into(), features: FeatureMap::new() },
                    1 => Command::Edit { bid, addr, features: FeatureMap::new() },
                    2 => Command::Remove { bid, addr },
                    3 => Command::AppendArray {
                        bid,
                        addr,
                        feature_name: "f".into(),
                        feature_addr: "_b0_".into(),
                    },
                    _ => Command::Recommendation { bid, addr, recommendation_decision: "accept".into() },
                }
            })
            .collect();

        let request = ClientRequest::WorkBatch(WorkBatch {
            cas_id: "42".into(),
            tool_name: Some("Time".into()),
            view: None,
            perspective: "default".into(),
            queue: queue.clone(),
            options: vec![BatchOption { private_session: false }],
        });
        let encoded: Value = serde_json::from_str(&request.encode().unwrap()).unwrap();
        let bids: Vec<&str> = encoded["data"]["queue"]
            .as_array()
            .unwrap()
            .iter()
            .map(|entry| entry["data"]["bid"].as_str().unwrap())
            .collect();
        let expected: Vec<&str> = queue.iter().map(Command::bid).collect();
        prop_assert_eq!(bids, expected);
    }
}
