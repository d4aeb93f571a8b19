mod test_support;

use serde_json::json;
use test_support::{request_err, request_ok, seed_club, spawn_sidecar, str_at, temp_dir};

#[test]
fn registration_bootstraps_owner_and_rejects_duplicate_qids() {
    let workspace = temp_dir("clubd-members-register");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(&mut stdin, &mut reader, "1", "workspace.select", json!({ "path": workspace.to_string_lossy() }));

    let owner = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "members.register",
        json!({ "name": "Founder", "qid": "F0001" }),
    );
    assert_eq!(owner["member"]["role"], json!("superadmin"));
    assert_eq!(owner["member"]["status"], json!("approved"));
    let owner_id = str_at(&owner, "/member/id").to_string();

    let reg = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "members.register",
        json!({ "name": "Asha Rao", "qid": "Q1001", "phone": "98765", "course": "B.Tech" }),
    );
    let m = &reg["member"];
    assert_eq!(m["role"], json!("member"));
    assert_eq!(m["status"], json!("pending"));
    assert_eq!(m["uid"], json!("PQ1001"));
    assert_eq!(m["branch"], json!("NA"));
    assert_eq!(m["housing"], json!("Day Scholar"));
    let asha = str_at(&reg, "/member/id").to_string();

    request_err(
        &mut stdin,
        &mut reader,
        "4",
        "members.register",
        json!({ "name": "Impostor", "qid": "Q1001" }),
        "duplicate_qid",
    );
    request_err(&mut stdin, &mut reader, "5", "members.register", json!({ "name": "No Qid" }), "bad_params");

    // Pending members cannot act as admins or RSVP.
    request_err(&mut stdin, &mut reader, "6", "members.list", json!({ "actorId": asha }), "forbidden");
    request_err(&mut stdin, &mut reader, "7", "members.list", json!({ "actorId": "ghost" }), "not_found");

    let pending = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "members.list",
        json!({ "actorId": owner_id, "status": "pending" }),
    );
    assert_eq!(pending["members"].as_array().map(|a| a.len()), Some(1));

    request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "members.setStatus",
        json!({ "actorId": owner_id, "memberId": asha, "status": "banned" }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "members.setStatus",
        json!({ "actorId": owner_id, "memberId": asha, "status": "pending" }),
    );
    let audit = request_ok(&mut stdin, &mut reader, "11", "audit.list", json!({ "actorId": owner_id, "limit": 2 }));
    let entries = audit["entries"].as_array().expect("entries");
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["action"], json!("UNBANNED_USER"));
    assert_eq!(entries[0]["details"], json!("Founder changed Asha Rao's status to PENDING."));
    assert_eq!(entries[1]["action"], json!("BANNED_USER"));

    let promoted = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "members.setRole",
        json!({ "actorId": owner_id, "memberId": asha, "role": "admin" }),
    );
    assert_eq!(promoted["member"]["role"], json!("admin"));
    request_err(
        &mut stdin,
        &mut reader,
        "13",
        "members.setRole",
        json!({ "actorId": asha, "memberId": owner_id, "role": "member" }),
        "forbidden",
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn directory_stats_follow_valid_events_and_threshold() {
    let workspace = temp_dir("clubd-members-eligibility");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(&mut stdin, &mut reader, "1", "workspace.select", json!({ "path": workspace.to_string_lossy() }));
    let (owner, ids) = seed_club(&mut stdin, &mut reader, &[("Asha Rao", "Q1001"), ("Bilal Khan", "Q1002")]);
    let (asha, bilal) = (&ids[0], &ids[1]);

    let mut events = Vec::new();
    for (i, (kind, date)) in [
        ("Visit", "2024-01-05T10:00"),
        ("Visit", "2024-01-12T10:00"),
        ("Meeting", "2024-01-19T10:00"),
        ("Event", "2024-01-26T10:00"),
    ]
    .iter()
    .enumerate()
    {
        let created = request_ok(
            &mut stdin,
            &mut reader,
            &format!("ev-{i}"),
            "events.create",
            json!({ "actorId": owner, "title": format!("Session {i}"), "kind": kind, "date": date }),
        );
        events.push(str_at(&created, "/event/id").to_string());
    }
    // Far-future event with no attendance does not count yet.
    request_ok(
        &mut stdin,
        &mut reader,
        "future",
        "events.create",
        json!({ "actorId": owner, "title": "Next Year", "kind": "Campaign", "date": "2099-01-01T10:00" }),
    );

    let marks = [(asha, 0), (asha, 1), (asha, 2), (bilal, 0), (bilal, 3)];
    for (i, (member, ev)) in marks.iter().enumerate() {
        request_ok(
            &mut stdin,
            &mut reader,
            &format!("mark-{i}"),
            "attendance.setManual",
            json!({ "actorId": owner, "eventId": events[*ev], "memberId": member, "present": true }),
        );
    }
    // Marking absent removes the record.
    request_ok(
        &mut stdin,
        &mut reader,
        "unmark",
        "attendance.setManual",
        json!({ "actorId": owner, "eventId": events[3], "memberId": bilal, "present": false }),
    );
    let audit = request_ok(&mut stdin, &mut reader, "a", "audit.list", json!({ "actorId": owner, "limit": 1 }));
    assert_eq!(audit["entries"][0]["action"], json!("MANUAL_ATTENDANCE_EDIT"));
    assert_eq!(audit["entries"][0]["details"], json!("Changed Bilal Khan's attendance to ABSENT."));

    let summary = request_ok(&mut stdin, &mut reader, "s1", "attendance.summary", json!({ "memberId": asha }));
    assert_eq!(summary["stats"], json!({ "attended": 3, "total": 4, "percentage": 75, "eligible": true }));
    assert_eq!(summary["thresholdPercent"], json!(75));
    let visit = summary["categories"]
        .as_array()
        .expect("categories")
        .iter()
        .find(|c| c["kind"] == json!("Visit"))
        .expect("visit category");
    assert_eq!(visit["label"], json!("Village Visits"));
    assert_eq!(visit["attended"], json!(2));
    assert_eq!(visit["percentage"], json!(100));
    let recent = summary["recent"].as_array().expect("recent");
    assert_eq!(recent.len(), 4);
    assert_eq!(recent[0]["status"], json!("Absent"));
    assert_eq!(recent[0]["title"], json!("Session 3"));

    let bilal_summary = request_ok(&mut stdin, &mut reader, "s2", "attendance.summary", json!({ "memberId": bilal }));
    assert_eq!(bilal_summary["stats"]["percentage"], json!(25));
    assert_eq!(bilal_summary["stats"]["eligible"], json!(false));

    let low = request_ok(
        &mut stdin,
        &mut reader,
        "l",
        "members.list",
        json!({ "actorId": owner, "status": "approved", "lowAttendance": true }),
    );
    let low_names: Vec<&str> = low["members"]
        .as_array()
        .expect("members")
        .iter()
        .map(|m| m["name"].as_str().expect("name"))
        .collect();
    assert_eq!(low_names, vec!["Bilal Khan", "Club Owner"]);

    let found = request_ok(
        &mut stdin,
        &mut reader,
        "q",
        "members.list",
        json!({ "actorId": owner, "search": "asha" }),
    );
    assert_eq!(found["members"].as_array().map(|a| a.len()), Some(1));
    assert_eq!(found["members"][0]["stats"]["eligible"], json!(true));
    let by_uid = request_ok(
        &mut stdin,
        &mut reader,
        "u",
        "members.list",
        json!({ "actorId": owner, "search": "PQ1002" }),
    );
    assert_eq!(by_uid["members"][0]["name"], json!("Bilal Khan"));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn profile_update_requests_are_reviewed_by_admins() {
    let workspace = temp_dir("clubd-members-updates");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(&mut stdin, &mut reader, "1", "workspace.select", json!({ "path": workspace.to_string_lossy() }));
    let (owner, ids) = seed_club(&mut stdin, &mut reader, &[("Asha Rao", "Q1001")]);
    let asha = &ids[0];

    request_err(
        &mut stdin,
        &mut reader,
        "2",
        "members.requestUpdate",
        json!({ "memberId": asha }),
        "bad_params",
    );
    let first = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "members.requestUpdate",
        json!({ "memberId": asha, "branch": "ECE", "phone": "11111" }),
    );
    let second = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "members.requestUpdate",
        json!({ "memberId": asha, "section": "B" }),
    );

    let pending = request_ok(&mut stdin, &mut reader, "5", "members.updateRequests.list", json!({ "actorId": owner }));
    let requests = pending["requests"].as_array().expect("requests");
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0]["changes"]["branch"], json!("ECE"));
    assert_eq!(requests[0]["changes"]["section"], json!(null));

    let approved = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "members.updateRequests.resolve",
        json!({ "actorId": owner, "requestId": first["requestId"], "approve": true }),
    );
    assert_eq!(approved["member"]["branch"], json!("ECE"));
    assert_eq!(approved["member"]["phone"], json!("11111"));
    assert_eq!(approved["member"]["section"], json!(""));

    request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "members.updateRequests.resolve",
        json!({ "actorId": owner, "requestId": second["requestId"], "approve": false }),
    );
    request_err(
        &mut stdin,
        &mut reader,
        "8",
        "members.updateRequests.resolve",
        json!({ "actorId": owner, "requestId": second["requestId"], "approve": true }),
        "bad_params",
    );
    let detail = request_ok(&mut stdin, &mut reader, "9", "members.get", json!({ "memberId": asha }));
    assert_eq!(detail["member"]["section"], json!(""));

    let audit = request_ok(&mut stdin, &mut reader, "10", "audit.list", json!({ "actorId": owner, "limit": 2 }));
    assert_eq!(audit["entries"][0]["action"], json!("REJECTED_PROFILE_UPDATE"));
    assert_eq!(audit["entries"][1]["action"], json!("APPROVED_PROFILE_UPDATE"));
    let remaining = request_ok(&mut stdin, &mut reader, "11", "members.updateRequests.list", json!({ "actorId": owner }));
    assert_eq!(remaining["requests"], json!([]));

    let _ = std::fs::remove_dir_all(workspace);
}
