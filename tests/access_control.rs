//! Permission behavior driven through whole sessions: several identities
//! sharing one volume, each command going through parse and execute.

use std::sync::Arc;

use tokio::sync::Mutex;

use mirrorfs::replicate::MessageBus;
use mirrorfs::{
    FsError, Identity, InProcessBus, Output, Publisher, Result, Role, Session, ShellCommand,
    Volume,
};

fn session(volume: &Arc<Mutex<Volume>>, uid: u32, role: Role) -> Session {
    let bus: Arc<dyn MessageBus> = Arc::new(InProcessBus::new());
    let publisher = Arc::new(Publisher::new(bus, "t-access"));
    Session::new(Arc::clone(volume), publisher, Identity::offline(uid, uid, role))
}

async fn run(session: &mut Session, line: &str) -> Result<Output> {
    session.execute(ShellCommand::parse(line)?).await
}

#[tokio::test]
async fn a_closed_ancestor_masks_an_open_leaf() {
    let volume = Arc::new(Mutex::new(Volume::new(1 << 20)));
    let mut owner = session(&volume, 1, Role::Admin);
    run(&mut owner, "mkdir /open").await.unwrap();
    run(&mut owner, "chmod 755 /open").await.unwrap();
    run(&mut owner, "touch /open/f").await.unwrap();
    run(&mut owner, "chmod 666 /open/f").await.unwrap();

    let mut reader = session(&volume, 2, Role::Normal);
    assert_eq!(run(&mut reader, "cat /open/f").await.unwrap(), Output::Bytes(Vec::new()));

    // Closing the directory revokes the world-readable leaf beneath it.
    run(&mut owner, "chmod 700 /open").await.unwrap();
    assert!(matches!(run(&mut reader, "cat /open/f").await, Err(FsError::Unauthorized)));
}

#[tokio::test]
async fn elevated_roles_skip_the_triplet_checks() {
    let volume = Arc::new(Mutex::new(Volume::new(1 << 20)));
    let mut owner = session(&volume, 1, Role::Admin);
    run(&mut owner, "mkdir /vault").await.unwrap();
    run(&mut owner, "touch /vault/secret").await.unwrap();

    let mut normal = session(&volume, 9, Role::Normal);
    assert!(matches!(
        run(&mut normal, "cat /vault/secret").await,
        Err(FsError::Unauthorized)
    ));

    let mut elevated = session(&volume, 9, Role::Admin);
    assert_eq!(
        run(&mut elevated, "cat /vault/secret").await.unwrap(),
        Output::Bytes(Vec::new())
    );
    run(&mut elevated, "mkdir /vault/inner").await.unwrap();
}

#[tokio::test]
async fn cd_requires_exec_on_the_whole_chain() {
    let volume = Arc::new(Mutex::new(Volume::new(1 << 20)));
    let mut owner = session(&volume, 1, Role::Admin);
    run(&mut owner, "mkdir /a").await.unwrap();
    run(&mut owner, "mkdir /a/b").await.unwrap();
    run(&mut owner, "chmod 711 /a/b").await.unwrap();

    let mut visitor = session(&volume, 2, Role::Normal);
    assert!(matches!(run(&mut visitor, "cd /a/b").await, Err(FsError::Unauthorized)));

    run(&mut owner, "chmod 711 /a").await.unwrap();
    run(&mut visitor, "cd /a/b").await.unwrap();
    assert_eq!(run(&mut visitor, "pwd").await.unwrap(), Output::Text("/a/b".into()));
}

#[tokio::test]
async fn rm_needs_write_and_exec_through_the_fold() {
    let volume = Arc::new(Mutex::new(Volume::new(1 << 20)));
    let mut owner = session(&volume, 1, Role::Admin);
    run(&mut owner, "mkdir /d").await.unwrap();
    run(&mut owner, "chmod 755 /d").await.unwrap();
    run(&mut owner, "touch /d/f").await.unwrap();
    run(&mut owner, "chmod 644 /d/f").await.unwrap();

    let mut visitor = session(&volume, 2, Role::Normal);
    assert!(matches!(run(&mut visitor, "rm /d/f").await, Err(FsError::Unauthorized)));

    run(&mut owner, "chmod 777 /d").await.unwrap();
    run(&mut owner, "chmod 733 /d/f").await.unwrap();
    run(&mut visitor, "rm /d/f").await.unwrap();

    let vol = volume.lock().await;
    assert!(vol.tree.resolve("/d/f", vol.tree.root()).is_err());
}

#[tokio::test]
async fn copy_path_validation_precedes_permissions() {
    let volume = Arc::new(Mutex::new(Volume::new(1 << 20)));
    let mut owner = session(&volume, 1, Role::Admin);
    run(&mut owner, "mkdir /locked").await.unwrap();
    run(&mut owner, "touch /locked/f").await.unwrap();

    let mut visitor = session(&volume, 2, Role::Normal);
    // Bad paths report as such, not as permission problems.
    assert!(matches!(
        run(&mut visitor, "cp /locked/f /locked/f").await,
        Err(FsError::AlreadyExists(_))
    ));
    assert!(matches!(
        run(&mut visitor, "cp /locked/missing /elsewhere").await,
        Err(FsError::NotFound(_))
    ));
    // Good paths fall through to the triplets.
    assert!(matches!(
        run(&mut visitor, "cp /locked/f /copy").await,
        Err(FsError::Unauthorized)
    ));
}

#[tokio::test]
async fn touch_and_ls_carry_no_permission_gate() {
    let volume = Arc::new(Mutex::new(Volume::new(1 << 20)));
    let mut owner = session(&volume, 1, Role::Admin);
    run(&mut owner, "mkdir /locked").await.unwrap();

    // touch, ls and stat are deliberately ungated; only the commands in
    // the authorization table consult the triplets.
    let mut visitor = session(&volume, 2, Role::Normal);
    run(&mut visitor, "touch /locked/t").await.unwrap();
    run(&mut visitor, "stat /locked/t").await.unwrap();
    match run(&mut visitor, "ls /locked").await.unwrap() {
        Output::Listing(entries) => assert_eq!(entries.len(), 1),
        other => panic!("expected a listing, got {other:?}"),
    }
}
