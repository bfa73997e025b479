//! Builds the single model request sent per analysis: the fixed audit
//! instructions, one file block per validated document and the JSON schema
//! the answer must follow.

use serde::Serialize;
use serde_json::{json, Value};

use crate::payload::DataUri;
use crate::validation::ValidatedDocument;

/// Name under which the output schema is registered with the provider.
pub const SCHEMA_NAME: &str = "contract_compliance_analysis";

/// Instructions sent ahead of the documents on every call.
pub const AUDIT_INSTRUCTIONS: &str = "\
You are an expert Real Estate Compliance Auditor.
Review the attached contract documents (PDFs) for a residential real estate transaction.

Step 1: Extract the Transaction Summary (Address, Parties, Price, Dates).

Step 2: Run the following Compliance Checklist. For each item, determine if it is PRESENT, MISSING, UNCLEAR, or NOT_APPLICABLE.

Checklist Rules to Apply:
1. Fully Executed Purchase Agreement: Signatures of both Buyer and Seller must be present on the final page.
2. Earnest Money Deposit: Amount and terms must be clearly specified.
3. Property Disclosure Statement: Must be present if the seller is not exempt.
4. Lead-Based Paint Addendum: REQUIRED if the property was built before 1978. Check the year built context. If post-1978, mark as NOT_APPLICABLE.
5. Financing Addendum: If the purchase is financed, this addendum must be included and signed.
6. Legal Description: A legal description of the property (Lot/Block or similar) must be present.
7. HOA Addendum: Required if the property is in a Home Owners Association. Look for mentions of HOA fees.

For every rule give short notes explaining the finding and the page number where the evidence was found, or null when there is none.

Step 3: Draft a polite, professional email to the opposing agent listing ONLY the MISSING or UNCLEAR items that need to be corrected.

Return the output strictly in JSON format matching the provided schema.";

/// One block of user message content, in OpenAI chat-completions shape.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock<'a> {
    Text { text: &'a str },
    File { file: FileBlock<'a> },
}

#[derive(Debug, Serialize)]
pub struct FileBlock<'a> {
    pub filename: &'a str,
    pub file_data: DataUri<'a>,
}

/// Instruction block followed by the documents, in upload order.  Payloads
/// are taken from validation as-is.
pub fn build_content<'a>(documents: &'a [ValidatedDocument<'a>]) -> Vec<ContentBlock<'a>> {
    let mut content = Vec::with_capacity(documents.len() + 1);
    content.push(ContentBlock::Text {
        text: AUDIT_INSTRUCTIONS,
    });
    for doc in documents {
        content.push(ContentBlock::File {
            file: FileBlock {
                filename: doc.display_name(),
                file_data: DataUri {
                    mime_type: doc.mime_type,
                    payload: doc.payload,
                },
            },
        });
    }
    content
}

/// JSON schema for `AnalysisResult`.  Strict mode requires every property to
/// be listed as required and extra properties to be forbidden.
pub fn analysis_schema() -> Value {
    let summary = json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["propertyAddress", "buyerName", "sellerName", "purchasePrice", "contractDate", "closingDate"],
        "properties": {
            "propertyAddress": { "type": "string", "description": "Full property address found in the contract." },
            "buyerName": { "type": "string", "description": "Name(s) of the buyer(s)." },
            "sellerName": { "type": "string", "description": "Name(s) of the seller(s)." },
            "purchasePrice": { "type": "string", "description": "Purchase price amount." },
            "contractDate": { "type": "string", "description": "Effective date of the contract." },
            "closingDate": { "type": "string", "description": "Scheduled closing/settlement date." }
        }
    });
    let item = json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["id", "ruleName", "description", "status", "notes", "pageReference"],
        "properties": {
            "id": { "type": "string" },
            "ruleName": { "type": "string" },
            "description": { "type": "string", "description": "Details for the compliance rule." },
            "status": { "type": "string", "enum": ["PRESENT", "MISSING", "UNCLEAR", "NOT_APPLICABLE"] },
            "notes": { "type": "string", "description": "Explanation of findings or why item is missing/unclear." },
            "pageReference": {
                "type": ["integer", "null"],
                "description": "The page number where evidence was found, or null if not applicable."
            }
        }
    });
    json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["summary", "checklist", "missingItemsEmailDraft"],
        "properties": {
            "summary": summary,
            "checklist": { "type": "array", "items": item },
            "missingItemsEmailDraft": {
                "type": "string",
                "description": "A professional email draft to the other agent listing all missing or unclear items requiring attention."
            }
        }
    })
}
