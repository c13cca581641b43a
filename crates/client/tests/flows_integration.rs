// Document, project, statistics and image flows against a scripted service.

mod support;

use annolab_client::flows::{DocumentFlow, FormValue, FormValues, ImagePager, ProjectFlow, ProjectStatsFlow};
use annolab_client::FlushOutcome;
use annolab_common::types::{CATEGORY_TYPE, COMMENT_TYPE};
use serde_json::json;
use support::{connect_ready, eventually, memory_client, WAIT};

#[tokio::test]
async fn document_flow_opens_view_and_tool_then_saves_after_changes() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let (client, _connector, mut links) = memory_client(dir.path());
    let mut server = connect_ready(&client, &mut links).await;

    let flow = DocumentFlow::start(&client, "42", "ada", "Time");
    assert_eq!(server.recv_json().await, json!({"cmd": "open_cas", "data": {"casId": "42"}}));
    assert_eq!(flow.loading().borrow().current_name(), Some("Open CAS Document"));
    assert_eq!(flow.loading().borrow().percent, 25.0);

    server.push(json!({"cmd": "open_cas", "data": {"casId": "42", "text": "Hello"}}));
    assert_eq!(
        server.recv_json().await,
        json!({"cmd": "open_view", "data": {"casId": "42", "view": "view_user_ada", "force": true}})
    );

    server.push(json!({"cmd": "open_view", "data": {"casId": "42", "view": "view_user_ada"}}));
    assert_eq!(
        server.recv_json().await,
        json!({"cmd": "open_tool", "data": {"casId": "42", "view": "view_user_ada", "toolName": "Time"}})
    );

    server.push(json!({"cmd": "open_tool", "data": {"casId": "42", "toolName": "Time", "toolElements": {
        CATEGORY_TYPE: {"101": {"_addr": 101, "features": {"begin": 0, "end": 5, "key": "mood", "value": "calm"}}}
    }}}));
    let doc = tokio::time::timeout(WAIT, flow.wait_ready())
        .await
        .expect("flow should finish in time")
        .expect("flow should deliver the document");
    assert_eq!(doc.id(), "42");
    assert!(flow.loading().borrow().completed);

    let mut values = flow.form_values().expect("form values should be readable");
    assert_eq!(values["mood"].addr.as_deref(), Some("101"));
    values.get_mut("mood").expect("mood field should exist").value = "tense".into();
    values.insert("clarity".into(), FormValue::new("4"));

    let FlushOutcome::Sent(receipt) = flow.submit_form(&values).expect("submit should find the document") else {
        panic!("form submit should send a batch");
    };
    receipt.delivered().await.expect("batch should be delivered");

    let batch = server.recv_json().await;
    assert_eq!(batch["cmd"], "work_batch");
    assert_eq!(batch["data"]["toolName"], "Time");
    assert_eq!(batch["data"]["view"], "view_user_ada");
    let queue = batch["data"]["queue"].as_array().expect("batch should carry a queue");
    assert_eq!(queue.len(), 2);
    // BTreeMap order: clarity before mood.
    assert_eq!(queue[0]["cmd"], "create");
    assert_eq!(queue[0]["data"]["_type"], CATEGORY_TYPE);
    assert_eq!(queue[0]["data"]["features"]["value"], "4");
    assert_eq!(queue[1]["cmd"], "edit");
    assert_eq!(queue[1]["data"]["addr"], "101");
    assert_eq!(queue[1]["data"]["features"]["end"], 5);

    server.push(json!({"cmd": "change_cas", "data": {"casId": "42", "updates": {
        CATEGORY_TYPE: {"101": {"_addr": 101, "features": {"begin": 0, "end": 5, "key": "mood", "value": "tense"}}}
    }}}));
    assert_eq!(server.recv_json().await, json!({"cmd": "save_cas", "data": {"casId": "42"}}));
    assert_eq!(flow.form_values().expect("form values should be readable")["mood"].value, "tense");
}

#[tokio::test]
async fn document_flow_ignores_other_documents() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let (client, _connector, mut links) = memory_client(dir.path());
    let mut server = connect_ready(&client, &mut links).await;

    let _flow = DocumentFlow::start(&client, "42", "ada", "Time");
    assert_eq!(server.recv_json().await["cmd"], "open_cas");

    server.push(json!({"cmd": "open_cas", "data": {"casId": "7", "text": "Other"}}));
    eventually(|| client.document("7").is_some()).await;
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    server.assert_silent();
}

#[tokio::test]
async fn restarting_a_flow_replaces_its_listeners() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let (client, _connector, mut links) = memory_client(dir.path());
    let _server = connect_ready(&client, &mut links).await;

    let first = DocumentFlow::start(&client, "42", "ada", "Time");
    let registered = client.registry().group_len("42");
    let _second = DocumentFlow::start(&client, "42", "ada", "Time");
    assert_eq!(client.registry().group_len("42"), registered);

    first.stop();
    assert_eq!(client.registry().group_len("42"), 0);
}

#[tokio::test]
async fn project_flow_opens_the_project_document() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let (client, _connector, mut links) = memory_client(dir.path());
    let mut server = connect_ready(&client, &mut links).await;

    let flow = ProjectFlow::start(&client, "7", "ada", "Time");
    assert_eq!(
        server.recv_json().await,
        json!({"cmd": "open_project", "data": {"projectId": "7", "viewName": "view_user_ada"}})
    );

    server.push(json!({"cmd": "open_project", "data": {"casId": 42}}));
    assert_eq!(server.recv_json().await, json!({"cmd": "open_cas", "data": {"casId": "42"}}));
    assert_eq!(client.store().project_cas_id().as_deref(), Some("42"));

    server.push(json!({"cmd": "open_cas", "data": {"casId": "42", "text": "Hello"}}));
    assert_eq!(server.recv_json().await["cmd"], "open_view");
    server.push(json!({"cmd": "open_view", "data": {"casId": "42", "view": "view_user_ada"}}));
    assert_eq!(server.recv_json().await["cmd"], "open_tool");
    server.push(json!({"cmd": "open_tool", "data": {"casId": "42", "toolName": "Time"}}));

    let doc = tokio::time::timeout(WAIT, flow.wait_ready())
        .await
        .expect("project flow should finish in time")
        .expect("project document should be available");
    assert_eq!(doc.id(), "42");

    let outcome = flow.submit_form(&FormValues::new()).expect("project document should be found");
    assert!(outcome.is_sent());
    assert_eq!(server.recv_json().await["cmd"], "work_batch");
}

#[tokio::test]
async fn stats_flow_reports_the_users_progress() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let (client, _connector, mut links) = memory_client(dir.path());
    let mut server = connect_ready(&client, &mut links).await;

    let flow = ProjectStatsFlow::start(&client, "7", "ada", 1);
    assert_eq!(
        server.recv_json().await,
        json!({"cmd": "list_project_stats", "data": {"projectId": "7", "viewName": "view_user_ada"}})
    );

    // A report about another project is ignored.
    server.push(json!({"cmd": "list_project_stats", "data": {
        "stats": {"personal": {}, "admin": {}},
        "project_data": {"success": true, "result": {"id": 8, "type": "PROJECT", "children": []}}
    }}));
    server.push(json!({"cmd": "list_project_stats", "data": {
        "stats": {"personal": {"m1": {"view_user_ada": {}}}, "admin": {}},
        "project_data": {"success": true, "result": {"id": 7, "type": "PROJECT", "access": 2, "children": [
            {"id": 1, "type": "DOCUMENT", "access": 2, "mongoid": "m1"},
            {"id": 2, "type": "DOCUMENT", "access": 2, "mongoid": "m2"}
        ]}}
    }}));

    let progress = tokio::time::timeout(WAIT, flow.wait())
        .await
        .expect("report should arrive in time")
        .expect("report should be decoded");
    assert_eq!(progress.completed, vec!["m1"]);
    assert_eq!(progress.documents.len(), 2);
    assert_eq!(progress.percent(), 50.0);
}

#[tokio::test]
async fn image_pager_pages_until_a_short_page() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let (client, _connector, mut links) = memory_client(dir.path());
    let mut server = connect_ready(&client, &mut links).await;
    server.push(json!({"cmd": "open_cas", "data": {"casId": "42", "text": "Hello"}}));
    eventually(|| client.document("42").is_some()).await;

    let mut pager = ImagePager::new(&client, "42", "Image", COMMENT_TYPE, 2);
    pager.request_next().expect("document should be open").expect("first page should be requested");
    assert_eq!(
        server.recv_json().await,
        json!({"cmd": "open_tool_seg", "data": {"casId": "42", "view": null, "page": 1, "pages": 2, "toolName": "Image"}})
    );
    server.push(json!({"cmd": "open_tool_seg", "data": {"casId": "42", "toolName": "Image", "toolElements": {
        COMMENT_TYPE: {
            "a": {"_addr": "a", "features": {"key": "core_image_image/png", "value": "img-a"}},
            "ia": {"_addr": "ia", "features": {"key": "core_image_index", "reference": "a", "value": "2"}}
        }
    }}}));
    tokio::time::timeout(WAIT, pager.wait_page()).await.expect("page should arrive").expect("pager should be live");
    assert!(!pager.reached_end());

    pager.request_next().expect("document should be open").expect("second page should be requested");
    assert_eq!(server.recv_json().await["data"]["page"], 2);
    server.push(json!({"cmd": "open_tool_seg", "data": {"casId": "42", "toolName": "Image", "toolElements": {
        COMMENT_TYPE: {
            "b": {"_addr": "b", "features": {"key": "core_image_image/png", "value": "img-b"}}
        }
    }}}));
    tokio::time::timeout(WAIT, pager.wait_page()).await.expect("page should arrive").expect("pager should be live");
    assert!(pager.reached_end());
    assert!(pager.request_next().expect("document should be open").is_none());

    let order: Vec<String> = pager.images().iter().filter_map(|image| image.feature_str("value")).collect();
    assert_eq!(order, vec!["img-a", "img-b"]);
}
