//! The image build path and the live exec path share one catalog

use docker_provisioner::image::plan;
use docker_provisioner::{
    BuildRecipe, Error, HostRecord, ImagePlan, MemoryEngine, PlatformFamily, SshBootstrapper,
};
use std::path::Path;

const PLATFORMS: [(&str, PlatformFamily); 7] = [
    ("ubuntu-22.04-amd64", PlatformFamily::Debian),
    ("cumulus-vx-4.2", PlatformFamily::Cumulus),
    ("fedora-28-x86_64", PlatformFamily::Fedora),
    ("centos-7-x86_64", PlatformFamily::RedHat),
    ("sles-15-x86_64", PlatformFamily::Suse),
    ("archlinux-current-x86_64", PlatformFamily::Arch),
    ("alpine-3.18-x86_64", PlatformFamily::Alpine),
];

/// Everything a usable root/password sshd needs, whichever path installed it
fn assert_ssh_ready(platform: &str, commands: &[String]) {
    let all = commands.join("\n");
    for needle in [
        "openssh",
        "ssh-keygen",
        "echo root:root | chpasswd",
        "PermitRootLogin yes",
        "PasswordAuthentication yes",
        "UseDNS no",
    ] {
        assert!(all.contains(needle), "{} is missing `{}`", platform, needle);
    }
}

#[test]
fn test_every_platform_has_a_family() {
    for (platform, family) in PLATFORMS {
        assert_eq!(PlatformFamily::for_platform(platform), Some(family));
    }
}

#[test]
fn test_build_path_yields_ready_sshd() {
    for (platform, family) in PLATFORMS {
        let host = HostRecord::new("a").with_image("base").with_platform(platform);
        let recipe = BuildRecipe::ssh_image("base", family, &host);
        let commands: Vec<String> = recipe.run_commands().map(str::to_string).collect();
        assert_ssh_ready(platform, &commands);
    }
}

#[smol_potat::test]
async fn test_exec_path_yields_ready_sshd() {
    for (platform, _) in PLATFORMS {
        let engine = MemoryEngine::new();
        let container = engine.add_running_container("target");
        let bootstrapper = SshBootstrapper::new(&engine);

        bootstrapper.install_ssh(&container, platform).await.unwrap();
        let outcome = bootstrapper.repair_ssh(&container, Some(platform)).await.unwrap();
        assert!(outcome.warnings.is_empty());

        assert_ssh_ready(platform, &engine.exec_log(&container));
    }
}

#[smol_potat::test]
async fn test_unknown_platform_fails_alike_on_both_paths() {
    let platform = "windows-2019-x86_64";
    let host = HostRecord::new("a").with_image("base").with_platform(platform);

    let build = plan(&host, None, Path::new("/")).unwrap_err();

    let engine = MemoryEngine::new();
    let container = engine.add_running_container("target");
    let exec = SshBootstrapper::new(&engine)
        .install_ssh(&container, platform)
        .await
        .unwrap_err();

    for err in [build, exec] {
        assert!(
            matches!(&err, Error::UnsupportedPlatform { platform: p } if p == platform),
            "{:?}",
            err
        );
        assert_eq!(err.to_string(), "platform 'windows-2019-x86_64' not yet supported on docker");
    }
}

#[test]
fn test_entry_point_plan_skips_catalog() {
    let mut host = HostRecord::new("a")
        .with_image("acme/sshd")
        .with_platform("windows-2019-x86_64");
    host.use_image_entry_point = true;

    match plan(&host, None, Path::new("/")).unwrap() {
        ImagePlan::Recipe { recipe, .. } => assert_eq!(recipe.run_commands().count(), 0),
        other => panic!("unexpected plan {:?}", other),
    }
}
