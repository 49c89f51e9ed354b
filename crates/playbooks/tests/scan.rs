use std::fs;

use kmcp_playbooks::Playbooks;

fn write(dir: &std::path::Path, name: &str, body: &str) {
    fs::write(dir.join(name), body).unwrap();
}

#[test]
fn scan_lists_sorted_and_skips_non_playbooks() {
    let tmp = tempfile::tempdir().unwrap();
    let d = tmp.path();
    write(d, "node-notready.md", "# Node NotReady\nkeywords: \"node, kubelet\"\nSUMMARY: Kubelet health.\n");
    write(d, "crashloop.md", "# CrashLoopBackOff\nkeywords: \"crash, restart\"\n");
    write(d, "README.md", "# Index\nno keywords here\n");
    write(d, "notes.txt", "keywords: \"txt\"\n");
    fs::create_dir(d.join("nested.md")).unwrap();
    fs::create_dir(d.join("sub")).unwrap();
    write(&d.join("sub"), "deep.md", "keywords: \"deep\"\n");

    let pb = Playbooks::scan(d).unwrap();
    let names: Vec<_> = pb.list().iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["crashloop", "node-notready"]);

    let json: serde_json::Value = serde_json::from_str(&pb.list_json().unwrap()).unwrap();
    assert_eq!(json[1]["title"], "Node NotReady");
    assert_eq!(json[1]["keywords"][0], "node, kubelet");
    assert_eq!(json[1]["summary"], "Kubelet health.");
}

#[test]
fn get_reads_by_base_name_only() {
    let tmp = tempfile::tempdir().unwrap();
    let d = tmp.path();
    write(d, "crashloop.md", "# CrashLoopBackOff\nkeywords: \"crash\"\nstep one\n");
    let pb = Playbooks::scan(d).unwrap();

    assert!(pb.get("crashloop").unwrap().contains("step one"));
    assert!(pb.get("../../etc/crashloop").unwrap().contains("step one"));
    let err = pb.get("missing").unwrap_err();
    assert!(err.to_string().contains("not found"), "{}", err);
    assert!(pb.get("").is_err());
}

#[test]
fn missing_directory_is_an_error() {
    let tmp = tempfile::tempdir().unwrap();
    assert!(Playbooks::scan(tmp.path().join("nope")).is_err());
}
