//! Retrospective Prompt

use recap_core::Message;

/// Top-level keys every generated document must carry
pub const REQUIRED_KEYS: [&str; 3] = ["titulo", "metricas_temporais", "tipo_de_amizade"];

/// Instruction template for the generative model
pub const RETROSPECTIVE_PROMPT: &str = r#"Analise a conversa enviada e gere uma retrospectiva de amizade estruturada, estritamente em JSON. Seja criativo, capture a essência da relação e calcule métricas exatas de constância (dias ativos).

## Regras (siga rigorosamente)

- Responda APENAS com o objeto JSON. Não use blocos de código markdown, citações ou marcadores de sistema.
- titulo: somente os nomes identificados na conversa (ex: "Clarinha & Estevão Moreira").
- tipo_de_amizade.descricao: exatamente no formato "Uma conexão divertida marcada por [característica 1], [característica 2] e muitas [característica 3].".
- tipo_de_amizade.por_que: frase livre e criativa explicando o nome_criativo.
- tipo_de_amizade.pilares: exatamente no formato "A amizade se sustenta [artigo + pilar 1]@ [artigo + pilar 2] # [artigo + pilar 3].".
- exemplo_real: uma mensagem real da conversa, com autor, texto e horário.

## Constância

- Identifique a data da primeira e da última mensagem (intervalo total, em dias).
- Conte os dias únicos com pelo menos uma mensagem (dias ativos).
- metricas_temporais.constancia_conversa: exatamente "Vocês conversaram X dias de um total de Y dias entre a primeira e última mensagem".

## Quantidades fixas

- melhores_momentos_eventos: exatamente 4 strings.
- momentos_engracados_piadas.itens: exatamente 4 strings.
- expressoes_internas: exatamente 4 strings.
- metas_proximo_ano: exatamente 3 strings.

## Estrutura obrigatória

{
  "titulo": "Nome A & Nome B",
  "metricas_temporais": {
    "inicio": "DD/MM/AAAA",
    "fim": "DD/MM/AAAA",
    "constancia_conversa": "string"
  },
  "tipo_de_amizade": {
    "nome_criativo": "string",
    "descricao": "string",
    "por_que": "string",
    "pilares": "string",
    "exemplo_real": { "autor": "string", "message": "string", "hour": "string" }
  },
  "melhores_momentos_eventos": ["string", "string", "string", "string"],
  "momentos_engracados_piadas": {
    "itens": ["string", "string", "string", "string"],
    "exemplo_real": { "autor": "string", "message": "string", "hour": "string" }
  },
  "expressoes_internas": ["string", "string", "string", "string"],
  "metas_proximo_ano": ["string", "string", "string"],
  "fechamento": "string"
}

## Privacidade

Nunca exponha números de telefone, endereços completos, CPFs ou outros documentos de identificação."#;

/// Messages for one generation call
pub fn build_messages(transcript: &str) -> Vec<Message> {
    vec![
        Message::system(RETROSPECTIVE_PROMPT),
        Message::user(format!("Arquivo de conversa:\n\n{transcript}")),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use recap_core::Role;

    #[test]
    fn test_prompt_names_every_required_key() {
        for key in REQUIRED_KEYS {
            assert!(RETROSPECTIVE_PROMPT.contains(key), "{key} missing from prompt");
        }
    }

    #[test]
    fn test_transcript_goes_in_user_turn() {
        let messages = build_messages("Ana: oi");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].role, Role::User);
        assert!(messages[1].content.ends_with("Ana: oi"));
    }
}
