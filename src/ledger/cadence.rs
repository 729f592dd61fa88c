//! Cadence script and transaction templates for the FlowTip contract, plus
//! the JSON-Cadence value codec used for arguments and results.
//!
//! Everything the ledger returns passes through [`CadenceValue`] and the
//! `decode_*` functions below before it reaches the rest of the service, so
//! malformed responses are rejected here instead of travelling inward.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Address, CreatorRecord, TipEvent, TokenAmount};

/// Placeholder substituted with the configured contract address.
pub const CONTRACT_PLACEHOLDER: &str = "0xFLOWTIP";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum CadenceValue {
    Bool(bool),
    String(String),
    Address(String),
    UInt64(String),
    UFix64(String),
    Optional(Option<Box<CadenceValue>>),
    Array(Vec<CadenceValue>),
    Struct(Composite),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Composite {
    pub id: String,
    pub fields: Vec<CompositeField>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeField {
    pub name: String,
    pub value: CadenceValue,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct DecodeError(pub String);

impl CadenceValue {
    pub fn address(address: &Address) -> Self {
        Self::Address(address.as_str().to_string())
    }

    pub fn amount(amount: TokenAmount) -> Self {
        Self::UFix64(amount.to_string())
    }

    pub fn string(value: &str) -> Self {
        Self::String(value.to_string())
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "Bool",
            Self::String(_) => "String",
            Self::Address(_) => "Address",
            Self::UInt64(_) => "UInt64",
            Self::UFix64(_) => "UFix64",
            Self::Optional(_) => "Optional",
            Self::Array(_) => "Array",
            Self::Struct(_) => "Struct",
        }
    }

    pub fn into_bool(self) -> Result<bool, DecodeError> {
        match self {
            Self::Bool(value) => Ok(value),
            other => Err(unexpected("Bool", &other)),
        }
    }

    /// Unwraps `Optional`; any non-optional value is treated as present.
    pub fn into_optional(self) -> Option<CadenceValue> {
        match self {
            Self::Optional(inner) => inner.map(|boxed| *boxed),
            other => Some(other),
        }
    }

    pub fn into_array(self) -> Result<Vec<CadenceValue>, DecodeError> {
        match self {
            Self::Array(items) => Ok(items),
            other => Err(unexpected("Array", &other)),
        }
    }

    pub fn into_amount(self) -> Result<TokenAmount, DecodeError> {
        match self {
            Self::UFix64(raw) => raw
                .parse()
                .map_err(|err| DecodeError(format!("invalid UFix64 {raw:?}: {err}"))),
            other => Err(unexpected("UFix64", &other)),
        }
    }
}

fn unexpected(expected: &str, found: &CadenceValue) -> DecodeError {
    DecodeError(format!("expected {expected}, found {}", found.kind()))
}

impl Composite {
    fn take(&mut self, name: &str) -> Result<CadenceValue, DecodeError> {
        let index = self
            .fields
            .iter()
            .position(|field| field.name == name)
            .ok_or_else(|| DecodeError(format!("{} is missing field {name}", self.id)))?;
        Ok(self.fields.swap_remove(index).value)
    }

    fn take_string(&mut self, name: &str) -> Result<String, DecodeError> {
        match self.take(name)? {
            CadenceValue::String(value) => Ok(value),
            other => Err(unexpected("String", &other)),
        }
    }

    fn take_u64(&mut self, name: &str) -> Result<u64, DecodeError> {
        match self.take(name)? {
            CadenceValue::UInt64(raw) => raw
                .parse()
                .map_err(|err| DecodeError(format!("invalid UInt64 {name}={raw:?}: {err}"))),
            other => Err(unexpected("UInt64", &other)),
        }
    }

    fn take_address(&mut self, name: &str) -> Result<Address, DecodeError> {
        match self.take(name)? {
            CadenceValue::Address(raw) => Address::parse(&raw)
                .map_err(|err| DecodeError(format!("invalid address {name}={raw:?}: {err}"))),
            other => Err(unexpected("Address", &other)),
        }
    }

    fn take_amount(&mut self, name: &str) -> Result<TokenAmount, DecodeError> {
        self.take(name)?.into_amount()
    }
}

fn into_struct(value: CadenceValue) -> Result<Composite, DecodeError> {
    match value {
        CadenceValue::Struct(composite) => Ok(composite),
        other => Err(unexpected("Struct", &other)),
    }
}

/// `CreatorInfo` struct into a record. `None` means the script returned nil.
pub fn decode_creator(value: CadenceValue) -> Result<Option<CreatorRecord>, DecodeError> {
    let Some(inner) = value.into_optional() else {
        return Ok(None);
    };
    let mut info = into_struct(inner)?;
    let record = CreatorRecord {
        id: info.take_u64("id")?,
        address: info.take_address("address")?,
        display_name: info.take_string("name")?,
        description: info.take_string("description")?,
        image_url: info.take_string("imageURL")?,
        tip_count: info.take_u64("tipCount")?,
        total_tipped: info.take_amount("totalTipped")?,
    };
    Ok(Some(record))
}

pub fn decode_creators(value: CadenceValue) -> Result<Vec<CreatorRecord>, DecodeError> {
    let mut creators = Vec::new();
    for item in value.into_array()? {
        if let Some(record) = decode_creator(item)? {
            creators.push(record);
        }
    }
    Ok(creators)
}

/// Tip history, newest first regardless of the order the contract stores it.
pub fn decode_tips(value: CadenceValue) -> Result<Vec<TipEvent>, DecodeError> {
    let mut tips = Vec::new();
    for item in value.into_array()? {
        let mut tip = into_struct(item)?;
        let timestamp = tip.take_amount("timestamp")?;
        tips.push(TipEvent {
            id: tip.take_u64("id")?,
            amount: tip.take_amount("amount")?,
            from: tip.take_address("from")?,
            message: tip.take_string("message")?,
            timestamp: block_timestamp(timestamp)?,
        });
    }
    tips.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
    Ok(tips)
}

/// Block timestamps arrive as UFix64 seconds since the epoch.
fn block_timestamp(seconds: TokenAmount) -> Result<DateTime<Utc>, DecodeError> {
    let units = seconds.base_units();
    let secs = i64::try_from(units / crate::models::amount::UNITS_PER_TOKEN)
        .map_err(|_| DecodeError("timestamp out of range".to_string()))?;
    let nanos = u32::try_from((units % crate::models::amount::UNITS_PER_TOKEN) * 10)
        .map_err(|_| DecodeError("timestamp out of range".to_string()))?;
    Utc.timestamp_opt(secs, nanos)
        .single()
        .ok_or_else(|| DecodeError(format!("timestamp {seconds} out of range")))
}

/// Binds a template to the deployed contract address.
pub fn bind(template: &str, contract: &Address) -> String {
    template.replace(CONTRACT_PLACEHOLDER, contract.as_str())
}

pub const IS_REGISTERED: &str = r#"
import FlowTip from 0xFLOWTIP

access(all) fun main(address: Address): Bool {
    return FlowTip.isCreatorRegistered(address: address)
}
"#;

pub const HAS_CREATOR_RESOURCE: &str = r#"
import FlowTip from 0xFLOWTIP

access(all) fun main(address: Address): Bool {
    return getAccount(address)
        .capabilities.get<&FlowTip.Creator>(FlowTip.CreatorPublicPath)
        .check()
}
"#;

pub const GET_CREATOR: &str = r#"
import FlowTip from 0xFLOWTIP

access(all) struct CreatorInfo {
    access(all) let id: UInt64
    access(all) let address: Address
    access(all) let name: String
    access(all) let description: String
    access(all) let imageURL: String
    access(all) let tipCount: UInt64
    access(all) let totalTipped: UFix64

    init(id: UInt64, address: Address, name: String, description: String, imageURL: String, tipCount: UInt64, totalTipped: UFix64) {
        self.id = id
        self.address = address
        self.name = name
        self.description = description
        self.imageURL = imageURL
        self.tipCount = tipCount
        self.totalTipped = totalTipped
    }
}

access(all) fun main(address: Address): CreatorInfo? {
    let creator = getAccount(address)
        .capabilities.get<&FlowTip.Creator>(FlowTip.CreatorPublicPath)
        .borrow()
        ?? panic("Could not borrow creator capability")
    return CreatorInfo(
        id: creator.id,
        address: address,
        name: creator.name,
        description: creator.description,
        imageURL: creator.imageURL,
        tipCount: creator.tipCount,
        totalTipped: creator.totalTipped
    )
}
"#;

pub const GET_CREATORS: &str = r#"
import FlowTip from 0xFLOWTIP

access(all) struct CreatorInfo {
    access(all) let id: UInt64
    access(all) let address: Address
    access(all) let name: String
    access(all) let description: String
    access(all) let imageURL: String
    access(all) let tipCount: UInt64
    access(all) let totalTipped: UFix64

    init(id: UInt64, address: Address, name: String, description: String, imageURL: String, tipCount: UInt64, totalTipped: UFix64) {
        self.id = id
        self.address = address
        self.name = name
        self.description = description
        self.imageURL = imageURL
        self.tipCount = tipCount
        self.totalTipped = totalTipped
    }
}

access(all) fun main(): [CreatorInfo] {
    let creators: [CreatorInfo] = []
    for address in FlowTip.getRegisteredCreators().keys {
        let cap = getAccount(address).capabilities.get<&FlowTip.Creator>(FlowTip.CreatorPublicPath)
        if let creator = cap.borrow() {
            creators.append(CreatorInfo(
                id: creator.id,
                address: address,
                name: creator.name,
                description: creator.description,
                imageURL: creator.imageURL,
                tipCount: creator.tipCount,
                totalTipped: creator.totalTipped
            ))
        }
    }
    return creators
}
"#;

pub const GET_TIP_HISTORY: &str = r#"
import FlowTip from 0xFLOWTIP

access(all) struct TipInfo {
    access(all) let id: UInt64
    access(all) let amount: UFix64
    access(all) let from: Address
    access(all) let message: String
    access(all) let timestamp: UFix64

    init(id: UInt64, amount: UFix64, from: Address, message: String, timestamp: UFix64) {
        self.id = id
        self.amount = amount
        self.from = from
        self.message = message
        self.timestamp = timestamp
    }
}

access(all) fun main(address: Address): [TipInfo] {
    let creator = getAccount(address)
        .capabilities.get<&FlowTip.Creator>(FlowTip.CreatorPublicPath)
        .borrow()
        ?? panic("Could not borrow creator capability")
    let tips: [TipInfo] = []
    for tip in creator.getTips() {
        tips.append(TipInfo(id: tip.id, amount: tip.amount, from: tip.from, message: tip.message, timestamp: tip.timestamp))
    }
    return tips
}
"#;

pub const GET_WITHDRAWABLE_BALANCE: &str = r#"
import FlowTip from 0xFLOWTIP

access(all) fun main(address: Address): UFix64 {
    if let creator = getAccount(address).capabilities.get<&FlowTip.Creator>(FlowTip.CreatorPublicPath).borrow() {
        return creator.getWithdrawableBalance()
    }
    return 0.0
}
"#;

pub const GET_ACCOUNT_BALANCE: &str = r#"
import FungibleToken from 0xf233dcee88fe0abe
import FlowToken from 0x1654653399040a61

access(all) fun main(address: Address): UFix64 {
    let vault = getAccount(address)
        .capabilities.get<&{FungibleToken.Balance}>(/public/flowTokenBalance)
        .borrow()
        ?? panic("Could not borrow Balance reference to the Vault")
    return vault.balance
}
"#;

pub const REGISTER_CREATOR: &str = r#"
import FlowTip from 0xFLOWTIP

transaction(name: String, description: String, imageURL: String) {
    prepare(account: auth(Storage, Capabilities) &Account) {
        pre {
            !FlowTip.isCreatorRegistered(address: account.address): "Creator already registered"
        }
        if let old <- account.storage.load<@FlowTip.Creator>(from: FlowTip.CreatorStoragePath) {
            destroy old
        }
        account.capabilities.unpublish(FlowTip.CreatorPublicPath)

        let creatorID = FlowTip.registerCreator(address: account.address)
        let creator <- FlowTip.createCreator(id: creatorID, name: name, description: description, imageURL: imageURL)
        account.storage.save(<-creator, to: FlowTip.CreatorStoragePath)

        let cap = account.capabilities.storage.issue<&FlowTip.Creator>(FlowTip.CreatorStoragePath)
        account.capabilities.publish(cap, at: FlowTip.CreatorPublicPath)
    }
}
"#;

pub const UPDATE_PROFILE: &str = r#"
import FlowTip from 0xFLOWTIP

transaction(name: String, description: String, imageURL: String) {
    prepare(account: auth(Storage) &Account) {
        let creator = account.storage.borrow<&FlowTip.Creator>(from: FlowTip.CreatorStoragePath)
            ?? panic("Could not borrow Creator resource from storage")
        creator.updateProfile(name: name, description: description, imageURL: imageURL)
    }
}
"#;

/// Re-checks both sides of the registration inside the transaction and
/// only inserts the registry entry while they still disagree.
pub const FIX_REGISTRY: &str = r#"
import FlowTip from 0xFLOWTIP

transaction() {
    prepare(account: auth(Storage) &Account) {
        let hasResource = account.storage.borrow<&FlowTip.Creator>(from: FlowTip.CreatorStoragePath) != nil
        let isRegistered = FlowTip.isCreatorRegistered(address: account.address)
        if hasResource && !isRegistered {
            let creatorID = FlowTip.registerCreator(address: account.address)
            log("Registry entry restored with ID ".concat(creatorID.toString()))
        } else {
            log("Registry already consistent")
        }
    }
}
"#;

pub const SEND_TIP: &str = r#"
import FungibleToken from 0xf233dcee88fe0abe
import FlowToken from 0x1654653399040a61
import FlowTip from 0xFLOWTIP

transaction(recipient: Address, amount: UFix64, message: String) {
    prepare(signer: auth(Storage) &Account) {
        let vault = signer.storage.borrow<auth(FungibleToken.Withdraw) &FlowToken.Vault>(from: /storage/flowTokenVault)
            ?? panic("Could not borrow reference to the sender's vault")
        let payment <- vault.withdraw(amount: amount)

        let creator = getAccount(recipient)
            .capabilities.get<&FlowTip.Creator>(FlowTip.CreatorPublicPath)
            .borrow()
            ?? panic("Could not borrow a reference to the Creator")
        let receiver = getAccount(recipient)
            .capabilities.get<&{FungibleToken.Receiver}>(/public/flowTokenReceiver)
            .borrow()
            ?? panic("Could not borrow a reference to the recipient's vault")

        receiver.deposit(from: <-payment)
        creator.receiveTip(amount: amount, from: signer.address, message: message)
    }
}
"#;

pub const WITHDRAW: &str = r#"
import FlowTip from 0xFLOWTIP

transaction(withdrawAmount: UFix64) {
    prepare(signer: auth(Storage) &Account) {
        let creator = signer.storage.borrow<&FlowTip.Creator>(from: FlowTip.CreatorStoragePath)
            ?? panic("Could not borrow Creator resource from storage")
        creator.withdraw(amount: withdrawAmount)
    }
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str, value: CadenceValue) -> CompositeField {
        CompositeField {
            name: name.to_string(),
            value,
        }
    }

    fn creator_info(address: &str, total: &str) -> CadenceValue {
        CadenceValue::Struct(Composite {
            id: "s.0.CreatorInfo".to_string(),
            fields: vec![
                field("id", CadenceValue::UInt64("7".to_string())),
                field("address", CadenceValue::Address(address.to_string())),
                field("name", CadenceValue::string("Dana")),
                field("description", CadenceValue::string("music")),
                field("imageURL", CadenceValue::string("")),
                field("tipCount", CadenceValue::UInt64("3".to_string())),
                field("totalTipped", CadenceValue::UFix64(total.to_string())),
            ],
        })
    }

    #[test]
    fn json_cadence_wire_shape() {
        let json = r#"{"type":"Optional","value":{"type":"Bool","value":true}}"#;
        let value: CadenceValue = serde_json::from_str(json).unwrap();
        assert_eq!(value.into_optional().unwrap().into_bool(), Ok(true));

        let nil: CadenceValue = serde_json::from_str(r#"{"type":"Optional","value":null}"#).unwrap();
        assert_eq!(nil.into_optional(), None);

        let encoded = serde_json::to_string(&CadenceValue::amount(TokenAmount::from_base_units(150_000_000))).unwrap();
        assert_eq!(encoded, r#"{"type":"UFix64","value":"1.50000000"}"#);
    }

    #[test]
    fn decodes_creator_struct() {
        let record = decode_creator(creator_info("0x01cf0e2f2f715450", "12.5"))
            .unwrap()
            .expect("record present");
        assert_eq!(record.id, 7);
        assert_eq!(record.display_name, "Dana");
        assert_eq!(record.tip_count, 3);
        assert_eq!(record.total_tipped.base_units(), 1_250_000_000);
        assert_eq!(record.address.as_str(), "0x01cf0e2f2f715450");
    }

    #[test]
    fn rejects_malformed_creator_struct() {
        let negative = creator_info("0x01", "-1.0");
        assert!(decode_creator(negative).is_err());

        let missing = CadenceValue::Struct(Composite {
            id: "s.0.CreatorInfo".to_string(),
            fields: vec![field("id", CadenceValue::UInt64("1".to_string()))],
        });
        assert!(decode_creator(missing).is_err());

        assert!(decode_creator(CadenceValue::Bool(true)).is_err());
        assert_eq!(decode_creator(CadenceValue::Optional(None)), Ok(None));
    }

    #[test]
    fn tip_history_is_newest_first() {
        let tip = |id: &str, ts: &str| {
            CadenceValue::Struct(Composite {
                id: "s.0.TipInfo".to_string(),
                fields: vec![
                    field("id", CadenceValue::UInt64(id.to_string())),
                    field("amount", CadenceValue::UFix64("1.0".to_string())),
                    field("from", CadenceValue::Address("0x02".to_string())),
                    field("message", CadenceValue::string("gm")),
                    field("timestamp", CadenceValue::UFix64(ts.to_string())),
                ],
            })
        };
        let value = CadenceValue::Array(vec![
            tip("1", "1700000000.0"),
            tip("2", "1700000100.5"),
        ]);
        let tips = decode_tips(value).unwrap();
        assert_eq!(tips.iter().map(|t| t.id).collect::<Vec<_>>(), vec![2, 1]);
        assert_eq!(tips[0].timestamp.timestamp(), 1_700_000_100);
        assert_eq!(tips[0].timestamp.timestamp_subsec_millis(), 500);
    }

    #[test]
    fn templates_bind_contract_address() {
        let contract = Address::parse("0x6c1b12e35dca8863").unwrap();
        let script = bind(IS_REGISTERED, &contract);
        assert!(script.contains("import FlowTip from 0x6c1b12e35dca8863"));
        assert!(!script.contains(CONTRACT_PLACEHOLDER));
    }
}
