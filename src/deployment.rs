use chrono::Utc;
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use ethers::types::Address;
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    fmt,
    fs,
    io::Write,
    path::{
        Path,
        PathBuf,
    },
};

pub const DEPLOYMENTS_ROOT: &str = ".deployments";
const DEPLOYMENTS_FILE: &str = "deployments.json";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeploymentEnv {
    Dev,
    Test,
    Local,
}

impl DeploymentEnv {
    pub fn dir_name(self) -> &'static str {
        match self {
            DeploymentEnv::Dev => "dev",
            DeploymentEnv::Test => "test",
            DeploymentEnv::Local => "local",
        }
    }
}

impl fmt::Display for DeploymentEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeploymentEnv::Dev => "Devnet",
            DeploymentEnv::Test => "Testnet",
            DeploymentEnv::Local => "Local",
        };
        write!(f, "{name}")
    }
}

/// The three fixed addresses the client needs at startup.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ContractAddresses {
    pub token: Address,
    pub lottery: Address,
    pub dealer: Address,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AddressOverrides {
    pub token: Option<String>,
    pub lottery: Option<String>,
    pub dealer: Option<String>,
}

impl AddressOverrides {
    pub fn is_empty(&self) -> bool {
        self.token.is_none() && self.lottery.is_none() && self.dealer.is_none()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub deployed_at: String,
    pub token_address: String,
    pub lottery_address: String,
    pub dealer_address: String,
    pub network_url: String,
    #[serde(default)]
    pub chain_id: Option<u64>,
}

impl DeploymentRecord {
    pub fn new(addresses: &ContractAddresses, network_url: impl Into<String>) -> Self {
        Self {
            deployed_at: Utc::now().to_rfc3339(),
            token_address: format!("{:?}", addresses.token),
            lottery_address: format!("{:?}", addresses.lottery),
            dealer_address: format!("{:?}", addresses.dealer),
            network_url: network_url.into(),
            chain_id: None,
        }
    }

    pub fn addresses(&self) -> Result<ContractAddresses> {
        Ok(ContractAddresses {
            token: parse_address("token", &self.token_address)?,
            lottery: parse_address("lottery", &self.lottery_address)?,
            dealer: parse_address("dealer", &self.dealer_address)?,
        })
    }
}

#[derive(Debug)]
pub struct DeploymentStore {
    path: PathBuf,
}

impl DeploymentStore {
    pub fn new(env: DeploymentEnv) -> Result<Self> {
        let path = ensure_store(Path::new(DEPLOYMENTS_ROOT), env)?;
        Ok(Self { path })
    }

    pub fn in_dir(root: impl AsRef<Path>, env: DeploymentEnv) -> Result<Self> {
        let path = ensure_store(root.as_ref(), env)?;
        Ok(Self { path })
    }

    pub fn load(&self) -> Result<Vec<DeploymentRecord>> {
        read_records(&self.path)
    }

    pub fn latest(&self) -> Result<Option<DeploymentRecord>> {
        Ok(self.load()?.pop())
    }

    pub fn append(&self, record: DeploymentRecord) -> Result<()> {
        let mut records = self.load()?;
        records.push(record);
        write_records(&self.path, &records)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Latest record for `env`, with any command-line address taking precedence.
pub fn resolve_addresses(
    store: &DeploymentStore,
    overrides: &AddressOverrides,
) -> Result<ContractAddresses> {
    let latest = store.latest()?;
    let pick = |name: &str,
                given: &Option<String>,
                stored: Option<&String>|
     -> Result<Address> {
        match (given, stored) {
            (Some(raw), _) => parse_address(name, raw),
            (None, Some(raw)) => parse_address(name, raw),
            (None, None) => Err(eyre!(
                "No {name} address configured; pass --{name} <address> or add a record to {}",
                store.path().display()
            )),
        }
    };
    Ok(ContractAddresses {
        token: pick(
            "token",
            &overrides.token,
            latest.as_ref().map(|r| &r.token_address),
        )?,
        lottery: pick(
            "lottery",
            &overrides.lottery,
            latest.as_ref().map(|r| &r.lottery_address),
        )?,
        dealer: pick(
            "dealer",
            &overrides.dealer,
            latest.as_ref().map(|r| &r.dealer_address),
        )?,
    })
}

/// Appends the resolved addresses as the newest record for the store's
/// network. Only meaningful when some address came from the command line.
pub fn record_overrides(
    store: &DeploymentStore,
    overrides: &AddressOverrides,
    addresses: &ContractAddresses,
    network_url: &str,
) -> Result<()> {
    if overrides.is_empty() {
        return Err(eyre!(
            "--save-deployment needs at least one of --token, --lottery or --dealer"
        ));
    }
    store.append(DeploymentRecord::new(addresses, network_url))?;
    tracing::info!(path = %store.path().display(), "deployment record saved");
    Ok(())
}

pub fn parse_address(name: &str, raw: &str) -> Result<Address> {
    raw.trim()
        .parse::<Address>()
        .map_err(|e| eyre!("Invalid {name} address '{raw}': {e}"))
}

pub fn ensure_structure() -> Result<()> {
    for env in [
        DeploymentEnv::Dev,
        DeploymentEnv::Test,
        DeploymentEnv::Local,
    ] {
        let _ = ensure_store(Path::new(DEPLOYMENTS_ROOT), env)?;
    }
    Ok(())
}

fn ensure_store(root: &Path, env: DeploymentEnv) -> Result<PathBuf> {
    if !root.exists() {
        fs::create_dir_all(root).wrap_err("Failed to create deployments directory")?;
    }

    let env_dir = root.join(env.dir_name());
    if !env_dir.exists() {
        fs::create_dir_all(&env_dir).wrap_err_with(|| {
            format!("Failed to create deployments/{} directory", env.dir_name())
        })?;
    }

    let file_path = env_dir.join(DEPLOYMENTS_FILE);
    if !file_path.exists() {
        let mut file = fs::File::create(&file_path).wrap_err_with(|| {
            format!(
                "Failed to create deployment record file for {} at {:?}",
                env, file_path
            )
        })?;
        file.write_all(b"[]").wrap_err_with(|| {
            format!("Failed to initialize deployment record file for {}", env)
        })?;
    }

    Ok(file_path)
}

fn read_records(path: impl AsRef<Path>) -> Result<Vec<DeploymentRecord>> {
    let data = fs::read(path.as_ref()).wrap_err("Failed to read deployment records")?;
    if data.is_empty() {
        return Ok(Vec::new());
    }
    let records = serde_json::from_slice::<Vec<DeploymentRecord>>(&data)
        .wrap_err("Failed to parse deployment records JSON")?;
    Ok(records)
}

fn write_records(path: impl AsRef<Path>, records: &[DeploymentRecord]) -> Result<()> {
    let json = serde_json::to_vec_pretty(records)
        .wrap_err("Failed to serialize deployment records")?;
    fs::write(path.as_ref(), json).wrap_err("Failed to write deployment records")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    const TOKEN: &str = "0x5FbDB2315678afecb367f032d93F642f64180aa3";
    const LOTTERY: &str = "0xe7f1725E7734CE288F8367e1Bb143E90bb3F0512";
    const DEALER: &str = "0x90F79bf6EB2c4f870365E785982E1f101E93b906";

    fn sample_addresses() -> ContractAddresses {
        ContractAddresses {
            token: TOKEN.parse().unwrap(),
            lottery: LOTTERY.parse().unwrap(),
            dealer: DEALER.parse().unwrap(),
        }
    }

    #[test]
    fn in_dir__creates_empty_record_file() {
        // given
        let dir = tempfile::tempdir().unwrap();

        // when
        let store = DeploymentStore::in_dir(dir.path(), DeploymentEnv::Local).unwrap();

        // then
        assert!(store.path().ends_with("local/deployments.json"));
        assert!(store.load().unwrap().is_empty());
        assert!(store.latest().unwrap().is_none());
    }

    #[test]
    fn resolve_addresses__uses_latest_record() {
        // given
        let dir = tempfile::tempdir().unwrap();
        let store = DeploymentStore::in_dir(dir.path(), DeploymentEnv::Test).unwrap();
        let stale = ContractAddresses {
            token: Address::repeat_byte(1),
            ..sample_addresses()
        };
        store
            .append(DeploymentRecord::new(&stale, "http://localhost:8545"))
            .unwrap();
        store
            .append(DeploymentRecord::new(
                &sample_addresses(),
                "http://localhost:8545",
            ))
            .unwrap();

        // when
        let resolved = resolve_addresses(&store, &AddressOverrides::default()).unwrap();

        // then
        assert_eq!(resolved, sample_addresses());
    }

    #[test]
    fn resolve_addresses__overrides_take_precedence() {
        // given
        let dir = tempfile::tempdir().unwrap();
        let store = DeploymentStore::in_dir(dir.path(), DeploymentEnv::Dev).unwrap();
        store
            .append(DeploymentRecord::new(&sample_addresses(), "http://node"))
            .unwrap();
        let overrides = AddressOverrides {
            dealer: Some("0x90f79bf6eb2c4f870365e785982e1f101e93b906".into()),
            token: Some(format!("{:?}", Address::repeat_byte(9))),
            lottery: None,
        };

        // when
        let resolved = resolve_addresses(&store, &overrides).unwrap();

        // then
        assert_eq!(resolved.token, Address::repeat_byte(9));
        assert_eq!(resolved.lottery, sample_addresses().lottery);
        assert_eq!(resolved.dealer, sample_addresses().dealer);
    }

    #[test]
    fn resolve_addresses__missing_address_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = DeploymentStore::in_dir(dir.path(), DeploymentEnv::Local).unwrap();
        let overrides = AddressOverrides {
            token: Some(TOKEN.into()),
            lottery: Some(LOTTERY.into()),
            dealer: None,
        };

        let err = resolve_addresses(&store, &overrides).unwrap_err();
        assert!(err.to_string().contains("No dealer address configured"));
    }

    #[test]
    fn record_overrides__saved_addresses_resolve_on_next_start() {
        // given
        let dir = tempfile::tempdir().unwrap();
        let store = DeploymentStore::in_dir(dir.path(), DeploymentEnv::Local).unwrap();
        let overrides = AddressOverrides {
            token: Some(TOKEN.into()),
            lottery: Some(LOTTERY.into()),
            dealer: Some(DEALER.into()),
        };
        let addresses = resolve_addresses(&store, &overrides).unwrap();

        // when
        record_overrides(&store, &overrides, &addresses, "http://localhost:8545").unwrap();

        // then
        let reopened = DeploymentStore::in_dir(dir.path(), DeploymentEnv::Local).unwrap();
        let latest = reopened.latest().unwrap().unwrap();
        assert_eq!(latest.network_url, "http://localhost:8545");
        assert_eq!(
            resolve_addresses(&reopened, &AddressOverrides::default()).unwrap(),
            sample_addresses()
        );
    }

    #[test]
    fn record_overrides__without_overrides_is_an_error() {
        // given
        let dir = tempfile::tempdir().unwrap();
        let store = DeploymentStore::in_dir(dir.path(), DeploymentEnv::Test).unwrap();

        // when
        let err = record_overrides(
            &store,
            &AddressOverrides::default(),
            &sample_addresses(),
            "http://node",
        )
        .unwrap_err();

        // then
        assert!(err.to_string().contains("--save-deployment needs"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn parse_address__rejects_garbage() {
        assert!(parse_address("token", "0x1234").is_err());
        assert!(parse_address("token", "not an address").is_err());
    }
}
