//! Platform bootstrap catalog
//!
//! Maps a platform identifier to the family of package-manager steps that get
//! an SSH daemon running. The image build path and the live exec path both
//! read their commands from here, through [`PlatformFamily::for_platform`].

use crate::host::ROOT_PASSWORD;
use regex::Regex;
use std::sync::LazyLock;

const SSHD_CONFIG: &str = "/etc/ssh/sshd_config";

/// Platform families that have a bootstrap recipe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlatformFamily {
    /// Ubuntu and Debian
    Debian,
    /// Cumulus Linux
    Cumulus,
    /// Fedora 22 through 29, dnf based
    Fedora,
    /// Enterprise Linux, CentOS, older Fedora, Arista EOS
    RedHat,
    /// openSUSE and SLES
    Suse,
    /// Arch Linux
    Arch,
    /// Alpine, no service manager
    Alpine,
}

/// Ordered pattern table; earlier rows win
static PATTERNS: LazyLock<Vec<(Regex, PlatformFamily)>> = LazyLock::new(|| {
    [
        (r"ubuntu|debian", PlatformFamily::Debian),
        (r"cumulus", PlatformFamily::Cumulus),
        (r"fedora-(2[2-9])", PlatformFamily::Fedora),
        (r"^el-|centos|fedora|redhat|eos", PlatformFamily::RedHat),
        (r"opensuse|sles", PlatformFamily::Suse),
        (r"archlinux", PlatformFamily::Arch),
        (r"alpine", PlatformFamily::Alpine),
    ]
    .into_iter()
    .map(|(pattern, family)| (Regex::new(pattern).expect("static platform pattern"), family))
    .collect()
});

impl PlatformFamily {
    /// All families, in lookup order
    pub const ALL: [PlatformFamily; 7] = [
        PlatformFamily::Debian,
        PlatformFamily::Cumulus,
        PlatformFamily::Fedora,
        PlatformFamily::RedHat,
        PlatformFamily::Suse,
        PlatformFamily::Arch,
        PlatformFamily::Alpine,
    ];

    /// Find the family for a platform identifier
    pub fn for_platform(platform: &str) -> Option<Self> {
        PATTERNS
            .iter()
            .find(|(pattern, _)| pattern.is_match(platform))
            .map(|(_, family)| *family)
    }

    /// Package installation and host key generation, in order
    pub fn install_commands(self) -> &'static [&'static str] {
        match self {
            PlatformFamily::Debian | PlatformFamily::Cumulus => &[
                "apt-get update",
                "apt-get install -y openssh-server openssh-client",
                "ssh-keygen -A",
            ],
            PlatformFamily::Fedora => &[
                "dnf clean all",
                "dnf install -y sudo openssh-server openssh-clients",
                "ssh-keygen -A",
                "sed 's@session *required *pam_loginuid.so@session optional pam_loginuid.so@g' -i /etc/pam.d/sshd",
            ],
            PlatformFamily::RedHat => &[
                "yum clean all",
                "yum install -y sudo openssh-server openssh-clients",
                "ssh-keygen -t rsa -f /etc/ssh/ssh_host_rsa_key -N ''",
                "ssh-keygen -t dsa -f /etc/ssh/ssh_host_dsa_key -N ''",
                "sed 's@session *required *pam_loginuid.so@session optional pam_loginuid.so@g' -i /etc/pam.d/sshd",
            ],
            PlatformFamily::Suse => &[
                "zypper -n in openssh",
                "ssh-keygen -t rsa -f /etc/ssh/ssh_host_rsa_key -N ''",
                "ssh-keygen -t dsa -f /etc/ssh/ssh_host_dsa_key -N ''",
                "sed -ri 's/^#?UsePAM .*/UsePAM no/' /etc/ssh/sshd_config",
            ],
            PlatformFamily::Arch => &[
                "pacman --noconfirm -Sy archlinux-keyring",
                "pacman --noconfirm -Syu",
                "pacman -S --noconfirm openssh",
                "ssh-keygen -A",
                "sed -ri 's/^#?UsePAM .*/UsePAM no/' /etc/ssh/sshd_config",
                "systemctl enable sshd",
            ],
            PlatformFamily::Alpine => &["apk add --update openssh", "ssh-keygen -A"],
        }
    }

    /// Name of the ssh service for `service <name> ...`
    pub fn service_name(self) -> &'static str {
        match self {
            PlatformFamily::Debian => "ssh",
            _ => "sshd",
        }
    }

    /// Whether sshd has to be started by hand rather than through a service manager
    pub fn minimal_init(self) -> bool {
        matches!(self, PlatformFamily::Alpine)
    }

    /// Image command that starts sshd and keeps the container alive
    pub fn start_command(self) -> Vec<String> {
        if self.minimal_init() {
            return vec!["/usr/sbin/sshd".to_string(), "-D".to_string()];
        }
        vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("service {} start ; tail -f /dev/null", self.service_name()),
        ]
    }

    /// Command that (re)starts sshd inside a running container
    pub fn restart_command(self) -> String {
        if self.minimal_init() {
            "/usr/sbin/sshd".to_string()
        } else {
            format!("service {} restart", self.service_name())
        }
    }
}

/// Steps every family runs after installation: runtime dir and root password
pub fn account_commands() -> Vec<String> {
    vec![
        "mkdir -p /var/run/sshd".to_string(),
        format!("echo root:{} | chpasswd", ROOT_PASSWORD),
    ]
}

/// sshd settings for root/password login without reverse DNS
pub fn hardening_commands() -> Vec<String> {
    [
        "s/^#?PermitRootLogin .*/PermitRootLogin yes/",
        "s/^#?PasswordAuthentication .*/PasswordAuthentication yes/",
        "s/^#?UseDNS .*/UseDNS no/",
    ]
    .iter()
    .map(|expr| sed_in_place(expr))
    .collect()
}

/// Lets clients with many keys in their agent still log in
pub fn max_auth_tries_command() -> String {
    sed_in_place("s/^#?MaxAuthTries.*/MaxAuthTries 1000/")
}

fn sed_in_place(expr: &str) -> String {
    format!("sed -ri '{}' {}", expr, SSHD_CONFIG)
}
