use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use eth_keystore::decrypt_key;
use ethers::signers::{
    LocalWallet,
    MnemonicBuilder,
    coins_bip39::English,
};
use std::{
    fs,
    path::{
        Path,
        PathBuf,
    },
};

const WALLET_EXTENSION: &str = "wallet";
const MIN_MNEMONIC_WORDS: usize = 12;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WalletDescriptor {
    pub name: String,
    pub path: PathBuf,
}

impl WalletDescriptor {
    pub fn new(name: impl Into<String>, path: PathBuf) -> Self {
        Self {
            name: name.into(),
            path,
        }
    }
}

pub fn default_wallet_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").wrap_err("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".lottery").join("wallets"))
}

pub fn resolve_wallet_dir(dir: Option<&str>) -> Result<PathBuf> {
    match dir {
        Some(raw) => {
            let expanded = shellexpand::tilde(raw);
            Ok(PathBuf::from(expanded.into_owned()))
        }
        None => default_wallet_dir(),
    }
}

/// Every `*.wallet` keystore in `dir`, sorted by name.
pub fn list_wallets(dir: &Path) -> Result<Vec<WalletDescriptor>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut wallets = Vec::new();
    for entry in fs::read_dir(dir).wrap_err("Failed to read wallet directory")? {
        let path = entry.wrap_err("Failed to read wallet entry")?.path();
        if !path.is_file()
            || path.extension().and_then(|ext| ext.to_str()) != Some(WALLET_EXTENSION)
        {
            continue;
        }
        let name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .ok_or_else(|| eyre!("Invalid wallet filename {:?}", path))?
            .to_owned();
        wallets.push(WalletDescriptor::new(name, path));
    }
    wallets.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(wallets)
}

pub fn find_wallet(dir: &Path, name: &str) -> Result<WalletDescriptor> {
    list_wallets(dir)?
        .into_iter()
        .find(|w| w.name == name)
        .ok_or_else(|| eyre!("Wallet '{name}' not found in {}", dir.to_string_lossy()))
}

/// Decrypts the keystore. It may hold a raw secp256k1 key or a mnemonic
/// phrase; mnemonics derive the first account on the default path.
pub fn unlock_wallet(descriptor: &WalletDescriptor, passphrase: &str) -> Result<LocalWallet> {
    let secret = decrypt_key(&descriptor.path, passphrase.as_bytes())
        .map_err(|_| eyre!("Invalid passphrase for wallet '{}'", descriptor.name))?;

    if let Ok(wallet) = LocalWallet::from_bytes(&secret) {
        return Ok(wallet);
    }

    if let Ok(mnemonic) = std::str::from_utf8(&secret) {
        if mnemonic.split_whitespace().count() >= MIN_MNEMONIC_WORDS {
            let wallet = MnemonicBuilder::<English>::default()
                .phrase(mnemonic.trim())
                .build()
                .wrap_err_with(|| {
                    format!("Failed to derive key from wallet '{}'", descriptor.name)
                })?;
            return Ok(wallet);
        }
    }

    Err(eyre!(
        "Wallet '{}' contained unsupported key material",
        descriptor.name
    ))
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use ethers::signers::Signer;

    const PRIVATE_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn write_keystore(dir: &Path, name: &str, secret: &[u8], passphrase: &str) -> PathBuf {
        let file_name = format!("{name}.wallet");
        let mut rng = ethers::core::rand::thread_rng();
        eth_keystore::encrypt_key(dir, &mut rng, secret, passphrase, Some(&file_name)).unwrap();
        dir.join(file_name)
    }

    #[test]
    fn list_wallets__returns_sorted_wallet_files_only() {
        // given
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("zed.wallet"), "{}").unwrap();
        fs::write(dir.path().join("alice.wallet"), "{}").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignore me").unwrap();
        fs::create_dir(dir.path().join("nested.wallet")).unwrap();

        // when
        let wallets = list_wallets(dir.path()).unwrap();

        // then
        let names: Vec<_> = wallets.iter().map(|w| w.name.as_str()).collect();
        assert_eq!(names, vec!["alice", "zed"]);
    }

    #[test]
    fn list_wallets__missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let wallets = list_wallets(&dir.path().join("absent")).unwrap();
        assert!(wallets.is_empty());
    }

    #[test]
    fn find_wallet__unknown_name_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = find_wallet(dir.path(), "bob").unwrap_err();
        assert!(err.to_string().contains("Wallet 'bob' not found"));
    }

    #[test]
    fn resolve_wallet_dir__expands_tilde() {
        let home = std::env::var("HOME").unwrap();
        let dir = resolve_wallet_dir(Some("~/keys")).unwrap();
        assert_eq!(dir, PathBuf::from(home).join("keys"));
    }

    #[test]
    fn unlock_wallet__decrypts_raw_private_key() {
        // given
        let dir = tempfile::tempdir().unwrap();
        let secret = hex::decode(PRIVATE_KEY).unwrap();
        let path = write_keystore(dir.path(), "dealer", &secret, "hunter2");
        let descriptor = WalletDescriptor::new("dealer", path);

        // when
        let wallet = unlock_wallet(&descriptor, "hunter2").unwrap();

        // then
        let expected: ethers::types::Address = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"
            .parse()
            .unwrap();
        assert_eq!(wallet.address(), expected);
    }

    #[test]
    fn unlock_wallet__wrong_passphrase_is_rejected() {
        // given
        let dir = tempfile::tempdir().unwrap();
        let secret = hex::decode(PRIVATE_KEY).unwrap();
        let path = write_keystore(dir.path(), "player", &secret, "right");
        let descriptor = WalletDescriptor::new("player", path);

        // when
        let err = unlock_wallet(&descriptor, "wrong").unwrap_err();

        // then
        assert!(err.to_string().contains("Invalid passphrase for wallet 'player'"));
    }
}
